//! Error types for Tessera
//!
//! `TesseraError` covers failures that are not tied to a coordination
//! round-trip: configuration loading and lock name validation.

/// Application-specific error types
#[derive(thiserror::Error, Debug)]
pub enum TesseraError {
    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("invalid lock name '{name}': {reason}")]
    InvalidLockName { name: String, reason: &'static str },
}

impl From<config::ConfigError> for TesseraError {
    fn from(value: config::ConfigError) -> Self {
        TesseraError::ConfigError(value.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TesseraError>;
