//! Configuration for the replication driver.
//!
//! Loaded from a TOML file; every field has a default, so an empty file is a
//! valid configuration.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Driver configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DriverConfig {
    /// Maximum entries requested per fetch (default: 100).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Retries of a transiently failing fetch before giving up (default: 5).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First retry delay in milliseconds (default: 100).
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    /// Upper bound on the retry delay in milliseconds (default: 30000).
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
    /// Save a checkpoint after every batch that returned entries (default: true).
    #[serde(default = "default_checkpoint_every_batch")]
    pub checkpoint_every_batch: bool,
}

// Default value functions
fn default_batch_size() -> usize {
    100
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_base_ms() -> u64 {
    100
}

fn default_retry_max_ms() -> u64 {
    30_000 // 30 seconds
}

fn default_checkpoint_every_batch() -> bool {
    true
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            retry_max_ms: default_retry_max_ms(),
            checkpoint_every_batch: default_checkpoint_every_batch(),
        }
    }
}

impl DriverConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that parse but cannot drive replication.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a zero `batch_size` or a
    /// `retry_base_ms` above `retry_max_ms`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        if self.retry_base_ms > self.retry_max_ms {
            return Err(ConfigError::Invalid(format!(
                "retry_base_ms ({}) exceeds retry_max_ms ({})",
                self.retry_base_ms, self.retry_max_ms
            )));
        }
        Ok(())
    }

    /// First retry delay.
    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }

    /// Retry delay cap.
    pub fn retry_max(&self) -> Duration {
        Duration::from_millis(self.retry_max_ms)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
    /// Configuration parsed but holds an unusable value.
    #[error("invalid config: {0}")]
    Invalid(String),
}
