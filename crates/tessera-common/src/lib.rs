//! Tessera Common - Shared constants, configuration, and utilities
//!
//! This crate provides the foundational pieces used across all Tessera components:
//! - Lock name markers shared by the lock recipes
//! - Node path helpers
//! - Lock configuration loading
//! - Logging bootstrap
//! - Common error type

pub mod config;
pub mod error;
pub mod logging;
pub mod path;

// Re-exports for convenience
pub use config::{LockConfig, RetryConfig};
pub use error::TesseraError;
pub use path::{make_path, node_name, parent_path, sequence_number, validate_lock_name};

/// Default lock name used by a plain mutex
pub const DEFAULT_LOCK_NAME: &str = "lock-";

/// Marker embedded in reader candidate names
pub const READ_LOCK_NAME: &str = "__READ__";

/// Marker embedded in writer candidate names
pub const WRITE_LOCK_NAME: &str = "__WRIT__";

/// Default acquisition timeout in milliseconds
pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 1000;

/// Default number of candidate recreations after the own node vanished
pub const DEFAULT_MAX_NODE_RECREATIONS: u32 = 3;

/// Width of the server-assigned sequence suffix
pub const SEQUENCE_WIDTH: usize = 10;

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "TESSERA";
