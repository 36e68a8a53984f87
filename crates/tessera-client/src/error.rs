//! Client error types for coordination round-trips

/// Error type for coordination client operations
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("node does not exist: {0}")]
    NoNode(String),

    #[error("node already exists: {0}")]
    NodeExists(String),

    #[error("node has children: {0}")]
    NotEmpty(String),

    #[error("connection lost")]
    ConnectionLoss,

    #[error("session expired")]
    SessionExpired,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl ClientError {
    /// Whether the outcome of the failed call is unknown to the caller.
    ///
    /// A create that fails this way may still have been applied on the server.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, ClientError::ConnectionLoss)
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
