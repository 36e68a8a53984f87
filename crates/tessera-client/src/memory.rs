//! In-memory coordination service
//!
//! `MemoryCoordinator` holds the shared node tree; every `MemoryClient`
//! obtained from `connect` is an independent session on it. Ephemeral nodes
//! are bound to the creating session and removed when it is closed or
//! expired. Watches are one-shot and fire after the tree lock is released.
//!
//! Faults can be injected per client to exercise ambiguous results: a create
//! that is applied on the server but reported as `ConnectionLoss`, or a plain
//! connection failure on the next call.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tessera_common::{SEQUENCE_WIDTH, parent_path};
use tracing::{debug, info};

use crate::client::CoordinationClient;
use crate::error::{ClientError, Result};
use crate::model::{ConnectionState, CreateMode, EventType, ListenerId, WatchedEvent};
use crate::watcher::{ConnectionStateListener, NodeWatcher};

/// Fault applied to the next matching call of a `MemoryClient`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFault {
    /// Apply the next `create` on the server but report `ConnectionLoss`
    LoseCreateResponse,
    /// Fail the next call of any kind with `ConnectionLoss` without applying it
    FailNextOperation,
}

struct NodeEntry {
    ephemeral_owner: Option<u64>,
    next_sequence: u64,
}

impl NodeEntry {
    fn new(ephemeral_owner: Option<u64>) -> Self {
        Self {
            ephemeral_owner,
            next_sequence: 0,
        }
    }
}

type PendingWatch = (Vec<Arc<dyn NodeWatcher>>, WatchedEvent);

struct TreeState {
    nodes: BTreeMap<String, NodeEntry>,
    watches: HashMap<String, Vec<Arc<dyn NodeWatcher>>>,
    live_sessions: HashSet<u64>,
}

impl TreeState {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), NodeEntry::new(None));
        Self {
            nodes,
            watches: HashMap::new(),
            live_sessions: HashSet::new(),
        }
    }

    fn child_names(&self, path: &str) -> Vec<String> {
        let prefix = child_prefix(path);
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| {
                let rest = &key[prefix.len()..];
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
            })
            .collect()
    }

    fn has_children(&self, path: &str) -> bool {
        let prefix = child_prefix(path);
        self.nodes
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(key, _)| key.starts_with(&prefix) && key.len() > prefix.len())
    }

    fn take_watches(&mut self, path: &str, event_type: EventType, fired: &mut Vec<PendingWatch>) {
        if let Some(watchers) = self.watches.remove(path) {
            fired.push((watchers, WatchedEvent::new(event_type, path)));
        }
    }

    fn insert_node(
        &mut self,
        path: &str,
        ephemeral_owner: Option<u64>,
        fired: &mut Vec<PendingWatch>,
    ) {
        self.nodes
            .insert(path.to_string(), NodeEntry::new(ephemeral_owner));
        self.take_watches(path, EventType::NodeCreated, fired);
    }

    fn ensure_parents(&mut self, parent: &str, fired: &mut Vec<PendingWatch>) {
        let mut missing = Vec::new();
        let mut current = Some(parent);
        while let Some(path) = current {
            if self.nodes.contains_key(path) {
                break;
            }
            missing.push(path.to_string());
            current = parent_path(path);
        }

        for path in missing.into_iter().rev() {
            self.insert_node(&path, None, fired);
        }
    }

    fn create(
        &mut self,
        path: &str,
        mode: CreateMode,
        make_parents: bool,
        session_id: u64,
        fired: &mut Vec<PendingWatch>,
    ) -> Result<String> {
        validate_path(path)?;
        let parent = parent_path(path).ok_or_else(|| ClientError::NoNode(path.to_string()))?;

        if !self.nodes.contains_key(parent) {
            if !make_parents {
                return Err(ClientError::NoNode(parent.to_string()));
            }
            self.ensure_parents(parent, fired);
        }

        let parent_entry = self
            .nodes
            .get_mut(parent)
            .ok_or_else(|| ClientError::NoNode(parent.to_string()))?;
        if parent_entry.ephemeral_owner.is_some() {
            return Err(ClientError::Other(anyhow!(
                "ephemeral node {} cannot have children",
                parent
            )));
        }

        let actual = if mode.is_sequential() {
            let sequence = parent_entry.next_sequence;
            parent_entry.next_sequence += 1;
            format!("{}{:0width$}", path, sequence, width = SEQUENCE_WIDTH)
        } else {
            path.to_string()
        };

        if self.nodes.contains_key(&actual) {
            return Err(ClientError::NodeExists(actual));
        }

        let owner = mode.is_ephemeral().then_some(session_id);
        self.insert_node(&actual, owner, fired);
        Ok(actual)
    }

    fn delete(&mut self, path: &str, fired: &mut Vec<PendingWatch>) -> Result<()> {
        validate_path(path)?;
        if path == "/" {
            return Err(ClientError::Other(anyhow!("the root node cannot be deleted")));
        }
        if !self.nodes.contains_key(path) {
            return Err(ClientError::NoNode(path.to_string()));
        }
        if self.has_children(path) {
            return Err(ClientError::NotEmpty(path.to_string()));
        }

        self.nodes.remove(path);
        self.take_watches(path, EventType::NodeDeleted, fired);
        Ok(())
    }

    fn end_session(&mut self, session_id: u64, fired: &mut Vec<PendingWatch>) -> usize {
        self.live_sessions.remove(&session_id);

        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, entry)| entry.ephemeral_owner == Some(session_id))
            .map(|(path, _)| path.clone())
            .collect();

        // deepest first so parents are never removed before their children
        for path in owned.iter().rev() {
            self.nodes.remove(path);
            self.take_watches(path, EventType::NodeDeleted, fired);
        }
        owned.len()
    }
}

fn child_prefix(path: &str) -> String {
    if path == "/" {
        "/".to_string()
    } else {
        format!("{}/", path)
    }
}

fn validate_path(path: &str) -> Result<()> {
    if !path.starts_with('/') || path.contains("//") || (path.len() > 1 && path.ends_with('/')) {
        return Err(ClientError::Other(anyhow!("invalid node path: '{}'", path)));
    }
    Ok(())
}

fn fire(pending: Vec<PendingWatch>) {
    for (watchers, event) in pending {
        for watcher in watchers {
            watcher.process(event.clone());
        }
    }
}

struct ServerInner {
    tree: Mutex<TreeState>,
    next_session_id: AtomicU64,
}

/// Shared in-memory coordination service.
///
/// Cloning yields another handle to the same node tree.
#[derive(Clone)]
pub struct MemoryCoordinator {
    inner: Arc<ServerInner>,
}

impl MemoryCoordinator {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ServerInner {
                tree: Mutex::new(TreeState::new()),
                next_session_id: AtomicU64::new(1),
            }),
        }
    }

    /// Open a new session.
    pub fn connect(&self) -> MemoryClient {
        let session_id = self.inner.next_session_id.fetch_add(1, Ordering::Relaxed);
        self.inner.tree.lock().live_sessions.insert(session_id);
        debug!(session_id, "Opened in-memory session");

        MemoryClient {
            server: self.inner.clone(),
            session_id,
            connected: AtomicBool::new(true),
            expired: AtomicBool::new(false),
            listeners: DashMap::new(),
            next_listener_id: AtomicU64::new(1),
            faults: Mutex::new(VecDeque::new()),
            latency: None,
        }
    }

    /// Whether a node exists, bypassing any session.
    pub fn node_exists(&self, path: &str) -> bool {
        self.inner.tree.lock().nodes.contains_key(path)
    }

    /// Sorted child names of a node, or `None` if it does not exist.
    pub fn children(&self, path: &str) -> Option<Vec<String>> {
        let tree = self.inner.tree.lock();
        if !tree.nodes.contains_key(path) {
            return None;
        }
        let mut names = tree.child_names(path);
        names.sort();
        Some(names)
    }

    /// Session owning an ephemeral node.
    pub fn ephemeral_owner(&self, path: &str) -> Option<u64> {
        self.inner
            .tree
            .lock()
            .nodes
            .get(path)
            .and_then(|entry| entry.ephemeral_owner)
    }

    /// Number of sessions that are neither closed nor expired.
    pub fn live_sessions(&self) -> usize {
        self.inner.tree.lock().live_sessions.len()
    }

    /// Number of watchers currently registered on a path.
    pub fn watch_count(&self, path: &str) -> usize {
        self.inner
            .tree
            .lock()
            .watches
            .get(path)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl Default for MemoryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// One session on a `MemoryCoordinator`.
pub struct MemoryClient {
    server: Arc<ServerInner>,
    session_id: u64,
    connected: AtomicBool,
    expired: AtomicBool,
    listeners: DashMap<ListenerId, Arc<dyn ConnectionStateListener>>,
    next_listener_id: AtomicU64,
    faults: Mutex<VecDeque<InjectedFault>>,
    latency: Option<Duration>,
}

impl MemoryClient {
    /// Delay every call by `latency` to widen race windows in tests.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Queue a fault for a later call.
    pub fn inject_fault(&self, fault: InjectedFault) {
        self.faults.lock().push_back(fault);
    }

    /// Drop the connection while keeping the session alive.
    pub fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            info!(session_id = self.session_id, "In-memory session suspended");
            self.notify_listeners(ConnectionState::Suspended);
        }
    }

    /// Re-establish the connection of a live session.
    pub fn reconnect(&self) {
        if self.expired.load(Ordering::SeqCst) {
            return;
        }
        if !self.connected.swap(true, Ordering::SeqCst) {
            info!(session_id = self.session_id, "In-memory session reconnected");
            self.notify_listeners(ConnectionState::Reconnected);
        }
    }

    /// Expire the session: its ephemeral nodes are deleted and listeners see `Lost`.
    pub fn expire_session(&self) {
        if self.expired.swap(true, Ordering::SeqCst) {
            return;
        }
        self.connected.store(false, Ordering::SeqCst);

        let mut fired = Vec::new();
        let removed = self.server.tree.lock().end_session(self.session_id, &mut fired);
        info!(
            session_id = self.session_id,
            removed, "In-memory session expired"
        );
        fire(fired);
        self.notify_listeners(ConnectionState::Lost);
    }

    /// Number of registered connection listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn notify_listeners(&self, state: ConnectionState) {
        // snapshot first so listeners may deregister themselves
        let listeners: Vec<_> = self
            .listeners
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for listener in listeners {
            listener.state_changed(state);
        }
    }

    async fn round_trip(&self) {
        match self.latency {
            Some(latency) => tokio::time::sleep(latency).await,
            None => tokio::task::yield_now().await,
        }
    }

    fn check_session(&self) -> Result<()> {
        if self.expired.load(Ordering::SeqCst) {
            return Err(ClientError::SessionExpired);
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ClientError::ConnectionLoss);
        }
        Ok(())
    }

    /// Pop the next queued fault if it applies to this kind of call.
    fn take_fault(&self, is_create: bool) -> Option<InjectedFault> {
        let mut faults = self.faults.lock();
        match faults.front() {
            Some(InjectedFault::FailNextOperation) => faults.pop_front(),
            Some(InjectedFault::LoseCreateResponse) if is_create => faults.pop_front(),
            _ => None,
        }
    }

    fn begin(&self, is_create: bool) -> Result<Option<InjectedFault>> {
        self.check_session()?;
        match self.take_fault(is_create) {
            Some(InjectedFault::FailNextOperation) => Err(ClientError::ConnectionLoss),
            other => Ok(other),
        }
    }
}

#[async_trait]
impl CoordinationClient for MemoryClient {
    async fn create(&self, path: &str, mode: CreateMode, make_parents: bool) -> Result<String> {
        self.round_trip().await;
        let fault = self.begin(true)?;

        let mut fired = Vec::new();
        let result =
            self.server
                .tree
                .lock()
                .create(path, mode, make_parents, self.session_id, &mut fired);
        fire(fired);

        let actual = result?;
        if fault == Some(InjectedFault::LoseCreateResponse) {
            debug!(path = %actual, "Dropping create response");
            return Err(ClientError::ConnectionLoss);
        }
        Ok(actual)
    }

    async fn get_children(&self, path: &str) -> Result<Vec<String>> {
        self.round_trip().await;
        self.begin(false)?;

        let tree = self.server.tree.lock();
        if !tree.nodes.contains_key(path) {
            return Err(ClientError::NoNode(path.to_string()));
        }
        Ok(tree.child_names(path))
    }

    async fn exists(&self, path: &str, watcher: Option<Arc<dyn NodeWatcher>>) -> Result<bool> {
        self.round_trip().await;
        self.begin(false)?;

        let mut tree = self.server.tree.lock();
        if let Some(watcher) = watcher {
            tree.watches.entry(path.to_string()).or_default().push(watcher);
        }
        Ok(tree.nodes.contains_key(path))
    }

    fn remove_watcher(&self, path: &str, watcher: &Arc<dyn NodeWatcher>) {
        let mut tree = self.server.tree.lock();
        if let Some(watchers) = tree.watches.get_mut(path) {
            watchers.retain(|registered| {
                !std::ptr::addr_eq(Arc::as_ptr(registered), Arc::as_ptr(watcher))
            });
            if watchers.is_empty() {
                tree.watches.remove(path);
            }
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.round_trip().await;
        self.begin(false)?;

        let mut fired = Vec::new();
        let result = self.server.tree.lock().delete(path, &mut fired);
        fire(fired);
        result
    }

    fn add_listener(&self, listener: Arc<dyn ConnectionStateListener>) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.insert(id, listener);
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners.remove(&id);
    }

    fn is_connected(&self) -> bool {
        !self.expired.load(Ordering::SeqCst) && self.connected.load(Ordering::SeqCst)
    }

    fn session_id(&self) -> u64 {
        self.session_id
    }
}

impl Drop for MemoryClient {
    fn drop(&mut self) {
        if self.expired.load(Ordering::SeqCst) {
            return;
        }
        let mut fired = Vec::new();
        self.server.tree.lock().end_session(self.session_id, &mut fired);
        fire(fired);
    }
}
