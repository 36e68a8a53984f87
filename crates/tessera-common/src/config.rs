//! Lock configuration
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! environment variables prefixed with `TESSERA_` (nested keys use `__`,
//! e.g. `TESSERA_RETRY__MAX_ATTEMPTS=5`).

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::{
    DEFAULT_ACQUIRE_TIMEOUT_MS, DEFAULT_LOCK_NAME, DEFAULT_MAX_NODE_RECREATIONS, ENV_PREFIX,
};

/// Backoff settings for retried acquisitions
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total number of acquisition attempts (including the first)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_backoff_ms: u64,
    /// Upper bound for a single backoff delay
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 50,
            max_backoff_ms: 1000,
        }
    }
}

/// Configuration shared by the lock recipes
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Name embedded in plain mutex candidate nodes
    pub lock_name: String,
    /// Default wait budget for a single acquisition
    pub acquire_timeout_ms: u64,
    /// How often a vanished candidate node is recreated within one attempt
    pub max_node_recreations: u32,
    /// Backoff for `acquire_with_retry`
    pub retry: RetryConfig,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lock_name: DEFAULT_LOCK_NAME.to_string(),
            acquire_timeout_ms: DEFAULT_ACQUIRE_TIMEOUT_MS,
            max_node_recreations: DEFAULT_MAX_NODE_RECREATIONS,
            retry: RetryConfig::default(),
        }
    }
}

impl LockConfig {
    /// Load configuration from an optional file and the process environment.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::load_with_env(file, None)
    }

    /// Load configuration, reading overrides from `env` instead of the process
    /// environment when given.
    pub fn load_with_env(
        file: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = file {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let config = builder.build()?.try_deserialize::<LockConfig>()?;
        config.validate()?;
        debug!(?config, "Loaded lock configuration");
        Ok(config)
    }

    /// Parse configuration from an inline TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?
            .try_deserialize::<LockConfig>()?;
        config.validate()?;
        Ok(config)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        crate::path::validate_lock_name(&self.lock_name)?;
        if self.retry.max_attempts == 0 {
            return Err(crate::TesseraError::ConfigError(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
