//! Tessera Client - Coordination service contract
//!
//! This crate provides:
//! - `CoordinationClient`, the async contract lock recipes are written against
//! - Node watch and connection state listener types
//! - Error types for coordination round-trips
//! - `MemoryCoordinator`, an in-process coordination service with sessions,
//!   ephemeral and sequential nodes, one-shot watches and fault injection

pub mod client;
pub mod error;
pub mod memory;
pub mod model;
pub mod watcher;

pub use client::CoordinationClient;
pub use error::{ClientError, Result};
pub use memory::{InjectedFault, MemoryClient, MemoryCoordinator};
pub use model::{ConnectionState, CreateMode, EventType, ListenerId, WatchedEvent};
pub use watcher::{
    ConnectionStateListener, FnConnectionStateListener, FnNodeWatcher, NodeWatcher,
};
