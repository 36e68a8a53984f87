//! Acquisition state machine shared by every lock kind
//!
//! One attempt creates a candidate node, then alternates between listing the
//! base path and waiting on the sibling the driver points at, until the driver
//! reports the candidate acquirable or the deadline passes. Every failing exit
//! deletes the candidate so no orphan node is left behind.

use std::sync::Arc;
use std::time::Duration;

use tessera_client::{
    ClientError, ConnectionState, ConnectionStateListener, CoordinationClient, ListenerId,
    NodeWatcher, WatchedEvent,
};
use tessera_common::{make_path, node_name, sequence_number};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::driver::{Acquirability, Candidate, LockDriver};
use crate::error::{LockError, Result};
use crate::owner::LockOwner;
use crate::telemetry;

/// Wakes a waiting attempt on a node event or a connection change
#[derive(Default)]
struct WakeSignal {
    notify: Notify,
}

impl NodeWatcher for WakeSignal {
    fn process(&self, event: WatchedEvent) {
        debug!(path = %event.path, event = ?event.event_type, "Watched node changed");
        self.notify.notify_one();
    }
}

impl ConnectionStateListener for WakeSignal {
    fn state_changed(&self, state: ConnectionState) {
        debug!(%state, "Connection state changed while waiting");
        self.notify.notify_one();
    }
}

/// Removes a connection listener when dropped
struct ListenerGuard<'a> {
    client: &'a dyn CoordinationClient,
    id: ListenerId,
}

impl<'a> ListenerGuard<'a> {
    fn register(client: &'a dyn CoordinationClient, signal: Arc<WakeSignal>) -> Self {
        let id = client.add_listener(signal);
        Self { client, id }
    }
}

impl Drop for ListenerGuard<'_> {
    fn drop(&mut self) {
        self.client.remove_listener(self.id);
    }
}

enum WaitOutcome {
    Acquired,
    TimedOut,
}

/// Candidate lifecycle for one lock instance
pub struct LockInternals {
    client: Arc<dyn CoordinationClient>,
    driver: LockDriver,
    base_path: String,
    lock_name: String,
    max_leases: usize,
    max_node_recreations: u32,
}

impl LockInternals {
    pub fn new(
        client: Arc<dyn CoordinationClient>,
        driver: LockDriver,
        base_path: impl Into<String>,
        lock_name: impl Into<String>,
        max_leases: usize,
        max_node_recreations: u32,
    ) -> Self {
        Self {
            client,
            driver,
            base_path: base_path.into(),
            lock_name: lock_name.into(),
            max_leases,
            max_node_recreations,
        }
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn lock_name(&self) -> &str {
        &self.lock_name
    }

    pub fn max_leases(&self) -> usize {
        self.max_leases
    }

    pub fn driver(&self) -> &LockDriver {
        &self.driver
    }

    pub fn client(&self) -> &Arc<dyn CoordinationClient> {
        &self.client
    }

    /// Try to obtain the lock for `owner` within `timeout`.
    ///
    /// Returns the path of the candidate node now holding the lock. A timeout
    /// too large to represent waits without a deadline.
    pub async fn attempt_lock(&self, owner: &LockOwner, timeout: Duration) -> Result<String> {
        let start = Instant::now();
        let deadline = start.checked_add(timeout);
        let mut recreations = 0u32;

        loop {
            let node = self.create_candidate(deadline, &mut recreations).await?;

            match self.wait_for_lock(&node, owner, deadline).await {
                Ok(WaitOutcome::Acquired) => {
                    debug!(
                        path = %node,
                        sequence = ?sequence_number(node_name(&node)),
                        %owner,
                        "Candidate node acquired"
                    );
                    telemetry::record_acquired(&self.base_path, start.elapsed());
                    return Ok(node);
                }
                Ok(WaitOutcome::TimedOut) => {
                    self.delete_our_path(&node).await;
                    telemetry::record_timeout(&self.base_path, start.elapsed());
                    return Err(LockError::Timeout {
                        path: self.base_path.clone(),
                        timeout,
                    });
                }
                Err(LockError::NodeMissing(missing))
                    if recreations < self.max_node_recreations && !is_past(deadline) =>
                {
                    recreations += 1;
                    debug!(
                        path = %node,
                        missing = %missing,
                        recreations,
                        "Candidate node vanished, recreating"
                    );
                    self.delete_our_path(&node).await;
                }
                Err(err) => {
                    self.delete_our_path(&node).await;
                    return Err(err);
                }
            }
        }
    }

    /// Delete a held candidate. A node that is already gone counts as released.
    pub async fn release_lock(&self, path: &str) -> Result<()> {
        match self.client.delete(path).await {
            Ok(()) | Err(ClientError::NoNode(_)) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Delete the base path if no contender is left.
    pub async fn clean(&self) -> Result<()> {
        match self.client.delete(&self.base_path).await {
            Ok(()) | Err(ClientError::NoNode(_)) | Err(ClientError::NotEmpty(_)) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Child names of the base path ordered by the driver's sort key.
    pub async fn get_sorted_children(&self) -> Result<Vec<String>> {
        let mut children = self.client.get_children(&self.base_path).await?;
        children.sort_by(|a, b| self.driver.compare(a, b, &self.lock_name));
        Ok(children)
    }

    /// Full paths of the siblings taking part in this lock, in queue order.
    ///
    /// A missing base path yields an empty list.
    pub async fn get_participant_nodes(&self) -> Result<Vec<String>> {
        let children = match self.get_sorted_children().await {
            Ok(children) => children,
            Err(LockError::Client(ClientError::NoNode(_))) => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };

        Ok(children
            .iter()
            .filter(|name| self.driver.is_participant(name, &self.lock_name))
            .map(|name| make_path(&[&self.base_path, name]))
            .collect())
    }

    async fn create_candidate(
        &self,
        deadline: Option<Instant>,
        recreations: &mut u32,
    ) -> Result<String> {
        loop {
            let candidate = Candidate::new(&self.base_path, &self.lock_name);
            let err = match self.driver.create_lock(self.client.as_ref(), &candidate).await {
                Ok(path) => return Ok(path),
                Err(err) if err.is_ambiguous() => err,
                Err(err) => return Err(err.into()),
            };

            warn!(
                base_path = %self.base_path,
                token = %candidate.token(),
                error = %err,
                "Create of lock node failed ambiguously, looking for protected node"
            );
            if let Some(path) = self.find_protected_node(&candidate).await? {
                warn!(path = %path, "Recovered lock node created before the fault");
                return Ok(path);
            }

            if *recreations >= self.max_node_recreations || is_past(deadline) {
                return Err(err.into());
            }
            *recreations += 1;
        }
    }

    async fn find_protected_node(&self, candidate: &Candidate) -> Result<Option<String>> {
        let children = match self.client.get_children(&self.base_path).await {
            Ok(children) => children,
            Err(ClientError::NoNode(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        Ok(children
            .into_iter()
            .find(|name| candidate.matches(name))
            .map(|name| make_path(&[&self.base_path, &name])))
    }

    async fn wait_for_lock(
        &self,
        node: &str,
        owner: &LockOwner,
        deadline: Option<Instant>,
    ) -> Result<WaitOutcome> {
        let name = node_name(node);

        loop {
            if !self.client.is_connected() {
                return Err(ClientError::ConnectionLoss.into());
            }

            let children = self
                .get_sorted_children()
                .await
                .map_err(|err| match err {
                    LockError::Client(inner) => LockError::node_missing_or(inner),
                    other => other,
                })?;

            let watch = match self
                .driver
                .is_acquirable(&children, name, self.max_leases, owner)?
            {
                Acquirability::Acquirable => return Ok(WaitOutcome::Acquired),
                Acquirability::Blocked { path_to_watch } => {
                    make_path(&[&self.base_path, &path_to_watch])
                }
            };

            let signal = Arc::new(WakeSignal::default());
            let _listener = ListenerGuard::register(self.client.as_ref(), signal.clone());
            let watcher: Arc<dyn NodeWatcher> = signal.clone();

            match self.client.exists(&watch, Some(watcher.clone())).await {
                Ok(true) => {}
                Ok(false) | Err(ClientError::NoNode(_)) => {
                    self.client.remove_watcher(&watch, &watcher);
                    debug!(path = %node, watch = %watch, "Predecessor already gone");
                    continue;
                }
                Err(err) => return Err(err.into()),
            }

            debug!(path = %node, watch = %watch, "Waiting for predecessor");
            match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero()
                        || tokio::time::timeout(remaining, signal.notify.notified())
                            .await
                            .is_err()
                    {
                        return Ok(WaitOutcome::TimedOut);
                    }
                }
                None => signal.notify.notified().await,
            }
        }
    }

    async fn delete_our_path(&self, path: &str) {
        match self.client.delete(path).await {
            Ok(()) | Err(ClientError::NoNode(_)) => {}
            Err(err) => {
                warn!(path = %path, error = %err, "Failed to delete lock node");
            }
        }
    }
}

fn is_past(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|deadline| Instant::now() >= deadline)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use async_trait::async_trait;
    use tessera_client::{CreateMode, InjectedFault, MemoryClient, MemoryCoordinator};

    /// Deletes the watched node right before the first `exists` call, the way
    /// a predecessor releasing between listing and watching would.
    struct VanishingWatchTarget {
        inner: MemoryClient,
        armed: AtomicBool,
    }

    #[async_trait]
    impl CoordinationClient for VanishingWatchTarget {
        async fn create(
            &self,
            path: &str,
            mode: CreateMode,
            make_parents: bool,
        ) -> tessera_client::Result<String> {
            self.inner.create(path, mode, make_parents).await
        }

        async fn get_children(&self, path: &str) -> tessera_client::Result<Vec<String>> {
            self.inner.get_children(path).await
        }

        async fn exists(
            &self,
            path: &str,
            watcher: Option<Arc<dyn NodeWatcher>>,
        ) -> tessera_client::Result<bool> {
            if self.armed.swap(false, Ordering::SeqCst) {
                self.inner.delete(path).await?;
            }
            self.inner.exists(path, watcher).await
        }

        fn remove_watcher(&self, path: &str, watcher: &Arc<dyn NodeWatcher>) {
            self.inner.remove_watcher(path, watcher);
        }

        async fn delete(&self, path: &str) -> tessera_client::Result<()> {
            self.inner.delete(path).await
        }

        fn add_listener(&self, listener: Arc<dyn ConnectionStateListener>) -> ListenerId {
            self.inner.add_listener(listener)
        }

        fn remove_listener(&self, id: ListenerId) {
            self.inner.remove_listener(id);
        }

        fn is_connected(&self) -> bool {
            self.inner.is_connected()
        }

        fn session_id(&self) -> u64 {
            self.inner.session_id()
        }
    }

    fn internals(client: Arc<dyn CoordinationClient>, path: &str) -> LockInternals {
        LockInternals::new(client, LockDriver::Standard, path, "lock-", 1, 3)
    }

    #[tokio::test]
    async fn test_attempt_lock_creates_candidate() {
        let server = MemoryCoordinator::new();
        let core = internals(Arc::new(server.connect()), "/locks/a");

        let path = core
            .attempt_lock(&LockOwner::named("a"), Duration::from_secs(1))
            .await
            .unwrap();

        assert!(path.starts_with("/locks/a/"));
        assert!(path.ends_with("-lock-0000000000"));
        assert!(server.node_exists(&path));
        assert_eq!(core.get_participant_nodes().await.unwrap(), vec![path]);
    }

    #[tokio::test]
    async fn test_timeout_removes_candidate_and_listener() {
        let server = MemoryCoordinator::new();
        let holder = internals(Arc::new(server.connect()), "/locks/b");
        let waiter_client = Arc::new(server.connect());
        let waiter = internals(waiter_client.clone(), "/locks/b");

        let held = holder
            .attempt_lock(&LockOwner::named("h"), Duration::from_secs(1))
            .await
            .unwrap();

        let err = waiter
            .attempt_lock(&LockOwner::named("w"), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::Timeout { ref path, .. } if path == "/locks/b"));

        assert_eq!(server.children("/locks/b").unwrap().len(), 1);
        assert!(server.node_exists(&held));
        assert_eq!(waiter_client.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_vanished_predecessor_leaves_no_watcher() {
        let server = MemoryCoordinator::new();
        let holder = internals(Arc::new(server.connect()), "/locks/v");
        let held = holder
            .attempt_lock(&LockOwner::named("h"), Duration::from_secs(1))
            .await
            .unwrap();

        let client = Arc::new(VanishingWatchTarget {
            inner: server.connect(),
            armed: AtomicBool::new(true),
        });
        let waiter = internals(client, "/locks/v");
        let path = waiter
            .attempt_lock(&LockOwner::named("w"), Duration::from_secs(1))
            .await
            .unwrap();

        assert!(!server.node_exists(&held));
        assert_eq!(server.watch_count(&held), 0);
        assert_eq!(
            server.children("/locks/v").unwrap(),
            vec![node_name(&path).to_string()]
        );
    }

    #[tokio::test]
    async fn test_zero_timeout_fails_fast_when_held() {
        let server = MemoryCoordinator::new();
        let holder = internals(Arc::new(server.connect()), "/locks/z");
        let waiter = internals(Arc::new(server.connect()), "/locks/z");

        holder
            .attempt_lock(&LockOwner::named("h"), Duration::ZERO)
            .await
            .unwrap();
        let err = waiter
            .attempt_lock(&LockOwner::named("w"), Duration::ZERO)
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_lost_create_response_is_recovered() {
        let server = MemoryCoordinator::new();
        let client = Arc::new(server.connect());
        let core = internals(client.clone(), "/locks/c");

        client.inject_fault(InjectedFault::LoseCreateResponse);
        let path = core
            .attempt_lock(&LockOwner::named("a"), Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(
            server.children("/locks/c").unwrap(),
            vec![node_name(&path).to_string()]
        );
    }

    #[tokio::test]
    async fn test_failed_create_is_retried() {
        let server = MemoryCoordinator::new();
        let client = Arc::new(server.connect());
        let core = internals(client.clone(), "/locks/r");

        client.inject_fault(InjectedFault::FailNextOperation);
        let path = core
            .attempt_lock(&LockOwner::named("a"), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(server.node_exists(&path));
    }

    #[tokio::test]
    async fn test_disconnected_client_fails_and_cleans_up() {
        let server = MemoryCoordinator::new();
        let holder = internals(Arc::new(server.connect()), "/locks/d");
        let client = Arc::new(server.connect());
        let waiter = internals(client.clone(), "/locks/d");

        holder
            .attempt_lock(&LockOwner::named("h"), Duration::from_secs(1))
            .await
            .unwrap();

        let disconnect = {
            let client = client.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                client.disconnect();
            }
        };

        let waiter_owner = LockOwner::named("w");
        let (result, ()) = tokio::join!(
            waiter.attempt_lock(&waiter_owner, Duration::from_secs(5)),
            disconnect
        );
        assert!(matches!(
            result.unwrap_err(),
            LockError::Client(ClientError::ConnectionLoss)
        ));
        assert_eq!(client.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_clean_is_idempotent() {
        let server = MemoryCoordinator::new();
        let core = internals(Arc::new(server.connect()), "/locks/e");

        core.clean().await.unwrap();

        let path = core
            .attempt_lock(&LockOwner::named("a"), Duration::from_secs(1))
            .await
            .unwrap();
        // contenders left: the base path stays
        core.clean().await.unwrap();
        assert!(server.node_exists("/locks/e"));

        core.release_lock(&path).await.unwrap();
        core.release_lock(&path).await.unwrap();
        core.clean().await.unwrap();
        core.clean().await.unwrap();
        assert!(!server.node_exists("/locks/e"));
    }

    #[tokio::test]
    async fn test_participants_of_missing_base_path() {
        let server = MemoryCoordinator::new();
        let core = internals(Arc::new(server.connect()), "/locks/none");
        assert!(core.get_participant_nodes().await.unwrap().is_empty());
    }
}
