//! Reentrant inter-process mutex
//!
//! Each instance tracks its holders in an [`OwnerRegistry`]; an owner that
//! already holds the lock re-enters without a round-trip to the service.
//! Two instances on the same path never share holders, so they exclude each
//! other exactly like two processes would.
//!
//! With `max_leases > 1` the same recipe behaves as a counting semaphore.

use std::sync::Arc;
use std::time::Duration;

use tessera_client::CoordinationClient;
use tessera_common::{
    DEFAULT_ACQUIRE_TIMEOUT_MS, DEFAULT_LOCK_NAME, DEFAULT_MAX_NODE_RECREATIONS, LockConfig,
    validate_lock_name,
};
use tracing::{debug, info, warn};

use crate::driver::LockDriver;
use crate::error::Result;
use crate::internals::LockInternals;
use crate::owner::{LockOwner, OwnerRegistry};
use crate::retry::RetryPolicy;
use crate::telemetry;

/// Construction options for [`InterProcessMutex`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutexOptions {
    /// Name embedded in candidate nodes
    pub lock_name: String,
    /// Number of simultaneous holders
    pub max_leases: usize,
    /// Wait budget of `acquire_default` and `acquire_with_retry`
    pub acquire_timeout: Duration,
    pub max_node_recreations: u32,
    pub retry: RetryPolicy,
}

impl Default for MutexOptions {
    fn default() -> Self {
        Self {
            lock_name: DEFAULT_LOCK_NAME.to_string(),
            max_leases: 1,
            acquire_timeout: Duration::from_millis(DEFAULT_ACQUIRE_TIMEOUT_MS),
            max_node_recreations: DEFAULT_MAX_NODE_RECREATIONS,
            retry: RetryPolicy::default(),
        }
    }
}

impl From<&LockConfig> for MutexOptions {
    fn from(config: &LockConfig) -> Self {
        Self {
            lock_name: config.lock_name.clone(),
            max_leases: 1,
            acquire_timeout: config.acquire_timeout(),
            max_node_recreations: config.max_node_recreations,
            retry: RetryPolicy::from(&config.retry),
        }
    }
}

impl MutexOptions {
    /// Set the candidate node marker. Fails for empty names, names containing
    /// `/` and names ending with a digit.
    pub fn with_lock_name(mut self, lock_name: impl Into<String>) -> Result<Self> {
        let lock_name = lock_name.into();
        validate_lock_name(&lock_name)?;
        self.lock_name = lock_name;
        Ok(self)
    }

    pub fn with_max_leases(mut self, max_leases: usize) -> Self {
        self.max_leases = max_leases.max(1);
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_max_node_recreations(mut self, max_node_recreations: u32) -> Self {
        self.max_node_recreations = max_node_recreations;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// A mutex shared across processes through the coordination service.
pub struct InterProcessMutex {
    internals: LockInternals,
    registry: Arc<OwnerRegistry>,
    acquire_timeout: Duration,
    retry: RetryPolicy,
}

impl InterProcessMutex {
    pub fn new(client: Arc<dyn CoordinationClient>, path: impl Into<String>) -> Self {
        Self::with_driver(client, path, LockDriver::Standard, MutexOptions::default())
    }

    /// Build a mutex from `options`, rejecting a lock name that could not be
    /// told apart from the sequence suffix.
    pub fn with_options(
        client: Arc<dyn CoordinationClient>,
        path: impl Into<String>,
        options: MutexOptions,
    ) -> Result<Self> {
        validate_lock_name(&options.lock_name)?;
        Ok(Self::with_driver(client, path, LockDriver::Standard, options))
    }

    pub(crate) fn with_driver(
        client: Arc<dyn CoordinationClient>,
        path: impl Into<String>,
        driver: LockDriver,
        options: MutexOptions,
    ) -> Self {
        let internals = LockInternals::new(
            client,
            driver,
            path,
            options.lock_name,
            options.max_leases,
            options.max_node_recreations,
        );
        Self {
            internals,
            registry: Arc::new(OwnerRegistry::new()),
            acquire_timeout: options.acquire_timeout,
            retry: options.retry,
        }
    }

    /// Name embedded in this lock's candidate nodes
    pub fn name(&self) -> &str {
        self.internals.lock_name()
    }

    /// Base path contenders queue under
    pub fn path(&self) -> &str {
        self.internals.base_path()
    }

    /// Default wait budget
    pub fn timeout(&self) -> Duration {
        self.acquire_timeout
    }

    pub(crate) fn registry(&self) -> Arc<OwnerRegistry> {
        self.registry.clone()
    }

    pub(crate) fn internals(&self) -> &LockInternals {
        &self.internals
    }

    /// Acquire for the current owner, waiting at most `timeout`.
    ///
    /// Each successful call must be balanced by a [`release`](Self::release).
    pub async fn acquire(&self, timeout: Duration) -> Result<()> {
        let owner = LockOwner::current();
        self.acquire_as(&owner, timeout).await
    }

    /// Acquire for the current owner with the configured default timeout.
    pub async fn acquire_default(&self) -> Result<()> {
        self.acquire(self.acquire_timeout).await
    }

    pub async fn acquire_as(&self, owner: &LockOwner, timeout: Duration) -> Result<()> {
        if self.registry.reenter(owner) {
            debug!(lock = %self.path(), %owner, "Lock re-entered");
            return Ok(());
        }

        let node = self.internals.attempt_lock(owner, timeout).await?;

        if let Some(surplus) = self.registry.insert(owner.clone(), node.clone()) {
            // the owner won the lock from another task meanwhile
            warn!(lock = %self.path(), path = %surplus, %owner, "Releasing surplus lock node");
            self.internals.release_lock(&surplus).await?;
            return Ok(());
        }

        info!(lock = %self.path(), path = %node, %owner, "Lock acquired");
        Ok(())
    }

    /// Acquire for the current owner, retrying timed-out attempts with backoff.
    pub async fn acquire_with_retry(&self) -> Result<()> {
        let owner = LockOwner::current();
        self.retry
            .run(|_| self.acquire_as(&owner, self.acquire_timeout))
            .await
    }

    /// Release one acquisition of the current owner.
    ///
    /// The candidate node is deleted once every acquisition was released.
    pub async fn release(&self) -> Result<()> {
        let owner = LockOwner::current();
        self.release_as(&owner).await
    }

    pub async fn release_as(&self, owner: &LockOwner) -> Result<()> {
        let Some(node) = self.registry.release(owner, self.path())? else {
            debug!(lock = %self.path(), %owner, "Lock count decremented");
            return Ok(());
        };

        self.internals.release_lock(&node).await?;
        telemetry::record_released(self.path());
        info!(lock = %self.path(), path = %node, %owner, "Lock released");
        Ok(())
    }

    /// Whether any owner of this instance holds the lock
    pub fn is_acquired(&self) -> bool {
        !self.registry.is_empty()
    }

    pub fn is_owned_by(&self, owner: &LockOwner) -> bool {
        self.registry.is_owned_by(owner)
    }

    pub fn is_owned_by_current_owner(&self) -> bool {
        self.is_owned_by(&LockOwner::current())
    }

    /// Candidate node held by `owner`, if any
    pub fn lock_node(&self, owner: &LockOwner) -> Option<String> {
        self.registry
            .handle(owner)
            .map(|handle| handle.path().to_string())
    }

    /// Full paths of every contender in queue order.
    pub async fn get_participant_nodes(&self) -> Result<Vec<String>> {
        self.internals.get_participant_nodes().await
    }

    /// Delete the base path if nobody contends for it anymore.
    pub async fn clean(&self) -> Result<()> {
        self.internals.clean().await
    }
}
