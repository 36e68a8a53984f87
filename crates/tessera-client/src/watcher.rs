//! Node watcher and connection listener traits plus closure adapters

use crate::model::{ConnectionState, WatchedEvent};

/// Receives the single notification of a one-shot node watch.
pub trait NodeWatcher: Send + Sync + 'static {
    /// Called once when the watched node is created, changed or deleted.
    fn process(&self, event: WatchedEvent);
}

/// Receives connection state changes of a client session.
pub trait ConnectionStateListener: Send + Sync + 'static {
    /// Called on every connection state transition.
    fn state_changed(&self, state: ConnectionState);
}

/// A node watcher that invokes a closure.
pub struct FnNodeWatcher<F>
where
    F: Fn(WatchedEvent) + Send + Sync + 'static,
{
    f: F,
}

impl<F> FnNodeWatcher<F>
where
    F: Fn(WatchedEvent) + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> NodeWatcher for FnNodeWatcher<F>
where
    F: Fn(WatchedEvent) + Send + Sync + 'static,
{
    fn process(&self, event: WatchedEvent) {
        (self.f)(event);
    }
}

/// A connection state listener that invokes a closure.
pub struct FnConnectionStateListener<F>
where
    F: Fn(ConnectionState) + Send + Sync + 'static,
{
    f: F,
}

impl<F> FnConnectionStateListener<F>
where
    F: Fn(ConnectionState) + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> ConnectionStateListener for FnConnectionStateListener<F>
where
    F: Fn(ConnectionState) + Send + Sync + 'static,
{
    fn state_changed(&self, state: ConnectionState) {
        (self.f)(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EventType;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[test]
    fn test_fn_node_watcher() {
        let called = Arc::new(AtomicBool::new(false));
        let called_clone = called.clone();

        let watcher = FnNodeWatcher::new(move |event: WatchedEvent| {
            assert_eq!(event.path, "/locks/a");
            assert_eq!(event.event_type, EventType::NodeDeleted);
            called_clone.store(true, Ordering::SeqCst);
        });

        watcher.process(WatchedEvent::new(EventType::NodeDeleted, "/locks/a"));
        assert!(called.load(Ordering::SeqCst));
    }

    #[test]
    fn test_fn_connection_listener() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();

        let listener = FnConnectionStateListener::new(move |state: ConnectionState| {
            if !state.is_connected() {
                count_clone.fetch_add(1, Ordering::SeqCst);
            }
        });

        listener.state_changed(ConnectionState::Suspended);
        listener.state_changed(ConnectionState::Reconnected);
        listener.state_changed(ConnectionState::Lost);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
