//! Tessera Recipes - Distributed locks over a coordination service
//!
//! This crate provides:
//! - `LockDriver`: candidate creation, sort keys and acquirability checks
//! - `LockInternals`: the create / list / watch / wait loop of one attempt
//! - `InterProcessMutex`: reentrant per-owner mutex (or semaphore with
//!   `max_leases > 1`)
//! - `InterProcessReadWriteLock`: reader/writer locks sharing one base path,
//!   biased towards pending writers
//!
//! All coordination goes through `tessera_client::CoordinationClient`; the
//! recipes keep no state on the server besides their candidate nodes.

pub mod driver;
pub mod error;
pub mod internals;
pub mod mutex;
pub mod owner;
pub mod read_write;
pub mod retry;
pub mod telemetry;

pub use driver::{Acquirability, Candidate, LockDriver};
pub use error::{LockError, Result};
pub use internals::LockInternals;
pub use mutex::{InterProcessMutex, MutexOptions};
pub use owner::{LockHandle, LockOwner, OwnerRegistry};
pub use read_write::InterProcessReadWriteLock;
pub use retry::RetryPolicy;
