//! Lock ownership
//!
//! Reentrancy is tracked per owner. By default the owner is the calling tokio
//! task, or the calling thread outside of any task. Work that spans several
//! tasks can share one owner by running inside [`LockOwner::scope`].

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::thread::ThreadId;

use parking_lot::Mutex;
use tokio::task;
use uuid::Uuid;

use crate::error::{LockError, Result};

tokio::task_local! {
    static CURRENT_OWNER: LockOwner;
}

/// Identity a lock is held by
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockOwner {
    Task(task::Id),
    Thread(ThreadId),
    Named(String),
}

impl LockOwner {
    /// Owner of the current execution context.
    ///
    /// Returns the owner installed by [`LockOwner::scope`] when called inside
    /// one, otherwise the running tokio task, otherwise the current thread.
    pub fn current() -> Self {
        if let Ok(owner) = CURRENT_OWNER.try_with(|owner| owner.clone()) {
            return owner;
        }
        match task::try_id() {
            Some(id) => LockOwner::Task(id),
            None => LockOwner::Thread(std::thread::current().id()),
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        LockOwner::Named(name.into())
    }

    /// A fresh owner distinct from every other.
    pub fn unique() -> Self {
        LockOwner::Named(Uuid::new_v4().to_string())
    }

    /// Run `future` with `self` as the current owner.
    pub async fn scope<F>(self, future: F) -> F::Output
    where
        F: Future,
    {
        CURRENT_OWNER.scope(self, future).await
    }
}

impl fmt::Display for LockOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockOwner::Task(id) => write!(f, "task-{}", id),
            LockOwner::Thread(id) => write!(f, "{:?}", id),
            LockOwner::Named(name) => write!(f, "{}", name),
        }
    }
}

/// Per-owner state of a held lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    path: String,
    count: usize,
}

impl LockHandle {
    fn new(path: String) -> Self {
        Self { path, count: 1 }
    }

    /// Candidate node backing the lock
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Number of outstanding acquisitions
    pub fn count(&self) -> usize {
        self.count
    }
}

/// Owner → handle map of one lock instance, behind a single mutex.
///
/// The mutex is never held across a coordination call.
#[derive(Debug, Default)]
pub struct OwnerRegistry {
    handles: Mutex<HashMap<LockOwner, LockHandle>>,
}

impl OwnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bump the count of an existing holder. Returns `false` if `owner` holds nothing.
    pub(crate) fn reenter(&self, owner: &LockOwner) -> bool {
        match self.handles.lock().get_mut(owner) {
            Some(handle) => {
                handle.count += 1;
                true
            }
            None => false,
        }
    }

    /// Record a fresh acquisition.
    ///
    /// If the owner acquired concurrently from another task in the meantime,
    /// the existing handle is reentered and the now surplus `path` is returned
    /// for the caller to release.
    pub(crate) fn insert(&self, owner: LockOwner, path: String) -> Option<String> {
        let mut handles = self.handles.lock();
        match handles.get_mut(&owner) {
            Some(handle) => {
                handle.count += 1;
                Some(path)
            }
            None => {
                handles.insert(owner, LockHandle::new(path));
                None
            }
        }
    }

    /// Drop one acquisition of `owner`.
    ///
    /// Returns the node path once the count reaches zero; the entry is erased
    /// at the same time. `lock_path` is only used for error reporting.
    pub(crate) fn release(&self, owner: &LockOwner, lock_path: &str) -> Result<Option<String>> {
        let mut handles = self.handles.lock();
        let handle = handles
            .get_mut(owner)
            .ok_or_else(|| LockError::NotOwner(lock_path.to_string()))?;

        let remaining = handle
            .count
            .checked_sub(1)
            .ok_or_else(|| LockError::NegativeLockCount(lock_path.to_string()))?;

        if remaining > 0 {
            handle.count = remaining;
            return Ok(None);
        }

        Ok(handles.remove(owner).map(|handle| handle.path))
    }

    pub fn is_owned_by(&self, owner: &LockOwner) -> bool {
        self.handles
            .lock()
            .get(owner)
            .is_some_and(|handle| handle.count > 0)
    }

    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }

    /// Snapshot of an owner's handle
    pub fn handle(&self, owner: &LockOwner) -> Option<LockHandle> {
        self.handles.lock().get(owner).cloned()
    }
}
