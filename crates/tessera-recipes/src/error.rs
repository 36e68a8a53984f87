//! Lock error types

use std::time::Duration;

use tessera_client::ClientError;
use tessera_common::TesseraError;

/// Error type for lock recipe operations
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Failed to acquire a lock on {path} after {timeout:?}")]
    Timeout { path: String, timeout: Duration },

    #[error("lock node is missing: {0}")]
    NodeMissing(String),

    #[error("You do not own the lock: {0}")]
    NotOwner(String),

    #[error("Lock count has gone negative: {0}")]
    NegativeLockCount(String),

    #[error("coordination error: {0}")]
    Client(#[from] ClientError),

    #[error("invalid lock options: {0}")]
    InvalidOptions(#[from] TesseraError),
}

impl LockError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, LockError::Timeout { .. })
    }

    /// Map a coordination `NoNode` into `NodeMissing`, leaving other errors as they are.
    pub(crate) fn node_missing_or(err: ClientError) -> Self {
        match err {
            ClientError::NoNode(path) => LockError::NodeMissing(path),
            other => LockError::Client(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, LockError>;
