//! Pipeline configuration
//!
//! Every field has a default, so a config file only needs to name what it
//! changes:
//!
//! ```json
//! { "tick_interval_ms": 1000, "backoff": { "max_retries": 8 } }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::history::DEFAULT_HISTORY_CAPACITY;
use crate::storage::offline_queue::{DEFAULT_ENQUEUE_ATTEMPTS, DEFAULT_RETRY_DELAY};
use crate::stream::{BackoffPolicy, StreamConfig};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Offline queue settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Location of the on-disk record log
    pub path: PathBuf,

    pub enqueue_attempts: u32,

    pub retry_delay_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./pulsetrack_data/offline_queue.log"),
            enqueue_attempts: DEFAULT_ENQUEUE_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY.as_millis() as u64,
        }
    }
}

impl QueueConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Milliseconds between generated readings
    pub tick_interval_ms: u64,

    /// Readings kept in the history window
    pub history_capacity: usize,

    pub backoff: BackoffPolicy,

    pub queue: QueueConfig,

    /// Fixed RNG seed for reproducible runs
    pub seed: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 2000,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            backoff: BackoffPolicy::default(),
            queue: QueueConfig::default(),
            seed: None,
        }
    }
}

impl PipelineConfig {
    /// Load and validate a JSON config file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick_interval_ms must be positive".into()));
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::Invalid("history_capacity must be positive".into()));
        }
        if self.backoff.base_ms == 0 {
            return Err(ConfigError::Invalid("backoff.base_ms must be positive".into()));
        }
        if self.backoff.max_ms < self.backoff.base_ms {
            return Err(ConfigError::Invalid(format!(
                "backoff.max_ms ({}) is below backoff.base_ms ({})",
                self.backoff.max_ms, self.backoff.base_ms
            )));
        }
        if self.queue.enqueue_attempts == 0 {
            return Err(ConfigError::Invalid("queue.enqueue_attempts must be at least 1".into()));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            tick_interval: self.tick_interval(),
            backoff: self.backoff,
        }
    }
}
