//! Coordination client contract
//!
//! Lock recipes only talk to the coordination service through this trait.
//! Implementations own connection management, retries and session handling.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{CreateMode, ListenerId};
use crate::watcher::{ConnectionStateListener, NodeWatcher};

/// Hierarchical, watch-capable coordination service client.
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// Create a node and return its actual path.
    ///
    /// For sequential modes the server appends a zero-padded sequence number
    /// unique within the parent. Missing parents are created as persistent
    /// nodes when `make_parents` is set, otherwise the call fails with
    /// `NoNode`.
    async fn create(&self, path: &str, mode: CreateMode, make_parents: bool) -> Result<String>;

    /// List the names (not full paths) of a node's children, in no particular order.
    async fn get_children(&self, path: &str) -> Result<Vec<String>>;

    /// Check whether a node exists.
    ///
    /// A watcher, when given, is registered whether or not the node exists and
    /// receives exactly one callback on the next create or delete of `path`.
    async fn exists(&self, path: &str, watcher: Option<Arc<dyn NodeWatcher>>) -> Result<bool>;

    /// Drop a watcher registered through `exists` before it has fired.
    /// Watchers that already fired or were never registered are ignored.
    fn remove_watcher(&self, path: &str, watcher: &Arc<dyn NodeWatcher>);

    /// Delete a node. Fails with `NoNode` or `NotEmpty`.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Register a connection state listener.
    fn add_listener(&self, listener: Arc<dyn ConnectionStateListener>) -> ListenerId;

    /// Remove a previously registered listener. Unknown ids are ignored.
    fn remove_listener(&self, id: ListenerId);

    /// Whether the client currently has a usable connection.
    fn is_connected(&self) -> bool;

    /// Identifier of the session ephemeral nodes are bound to.
    fn session_id(&self) -> u64;
}
