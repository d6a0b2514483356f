//! Runtime configuration (mapserv.toml)
//!
//! ```toml
//! [dispatcher]
//! workers = 4
//! queue_capacity = 64
//!
//! [completion]
//! on_panic = "propagate"
//!
//! [logging]
//! filter = "info"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Environment variable overriding `dispatcher.workers`
pub const WORKERS_ENV: &str = "MAPSERV_WORKERS";

/// Environment variable overriding `logging.filter`
pub const LOG_ENV: &str = "MAPSERV_LOG";

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// A value is out of range
    #[error("Invalid config: {0}")]
    ValidationError(String),
}

/// Top-level runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Worker pool settings
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Completion handler policy
    #[serde(default)]
    pub completion: CompletionConfig,

    /// Log filtering
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Worker pool settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Number of worker threads (0 = one per CPU)
    #[serde(default)]
    pub workers: usize,

    /// Capacity of the submission queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_queue_capacity() -> usize {
    64
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl DispatcherConfig {
    /// Worker count with `0` resolved to the number of CPUs
    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.workers
        }
    }
}

/// What to do when a completion handler panics
#[derive(Debug, Copy, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompletionPanic {
    /// Let the panic unwind out of the host's `run_*` call
    #[default]
    Propagate,
    /// Abort the process
    Abort,
}

/// Completion handler policy
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletionConfig {
    /// Panic policy
    #[serde(default)]
    pub on_panic: CompletionPanic,
}

/// Log filtering
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. "info" or "mapserv_runtime=debug"
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatcher.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "dispatcher.queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.logging.filter.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "logging.filter cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply `MAPSERV_WORKERS` and `MAPSERV_LOG` from the process environment
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(workers) = lookup(WORKERS_ENV) {
            self.dispatcher.workers = workers.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!("{} must be a number, got '{}'", WORKERS_ENV, workers))
            })?;
        }
        if let Some(filter) = lookup(LOG_ENV) {
            if !filter.trim().is_empty() {
                self.logging.filter = filter;
            }
        }
        self.validate()?;
        Ok(self)
    }
}
