//! Queue configuration.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{IdStrategy, QueueError};
use crate::queue::BackoffSchedule;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{0}")]
    Invalid(String),
}

impl From<ConfigError> for QueueError {
    fn from(err: ConfigError) -> Self {
        QueueError::Configuration(err.to_string())
    }
}

/// Per-queue configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Pending list key; the active list is `<name>:active`.
    pub name: String,

    /// Pending length that trips backpressure.
    #[serde(default = "default_max_size")]
    pub max_size: u64,

    /// How long `pop` blocks waiting for work.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Claims older than this are reported by the timeout monitor.
    #[serde(default = "default_sla_timeout")]
    pub sla_timeout_secs: u64,

    /// How often the timeout monitor probes the active list.
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_secs: u64,

    /// Pause durations, one per consecutive pause cycle.
    #[serde(default = "default_backoff_schedule")]
    pub backoff_schedule_secs: Vec<u64>,

    #[serde(default)]
    pub id_strategy: IdStrategy,

    /// Worker redeliveries before a failing task is discarded.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_size() -> u64 {
    100
}

fn default_idle_timeout() -> u64 {
    60
}

fn default_sla_timeout() -> u64 {
    60
}

fn default_monitor_interval() -> u64 {
    10
}

fn default_backoff_schedule() -> Vec<u64> {
    vec![5, 15, 30, 60, 120]
}

fn default_max_retries() -> u32 {
    3
}

impl QueueConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_size: default_max_size(),
            idle_timeout_secs: default_idle_timeout(),
            sla_timeout_secs: default_sla_timeout(),
            monitor_interval_secs: default_monitor_interval(),
            backoff_schedule_secs: default_backoff_schedule(),
            id_strategy: IdStrategy::default(),
            max_retries: default_max_retries(),
        }
    }

    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_idle_timeout_secs(mut self, secs: u64) -> Self {
        self.idle_timeout_secs = secs;
        self
    }

    pub fn with_sla_timeout_secs(mut self, secs: u64) -> Self {
        self.sla_timeout_secs = secs;
        self
    }

    pub fn with_backoff_schedule_secs(mut self, schedule: Vec<u64>) -> Self {
        self.backoff_schedule_secs = schedule;
        self
    }

    pub fn with_id_strategy(mut self, strategy: IdStrategy) -> Self {
        self.id_strategy = strategy;
        self
    }

    /// Fail fast on values the queue cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("the queue needs a name".into()));
        }
        if self.max_size == 0 {
            return Err(ConfigError::Invalid(
                "a positive max queue size must be specified".into(),
            ));
        }
        if self.idle_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "idle timeout must be at least one second".into(),
            ));
        }
        if self.monitor_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "monitor interval must be at least one second".into(),
            ));
        }
        if self.backoff_schedule_secs.is_empty() {
            return Err(ConfigError::Invalid(
                "backoff schedule must have at least one delay".into(),
            ));
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sla_timeout(&self) -> Duration {
        Duration::from_secs(self.sla_timeout_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    pub fn backoff_schedule(&self) -> BackoffSchedule {
        BackoffSchedule::from_secs(&self.backoff_schedule_secs)
    }
}

/// TOML configuration loader.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load a configuration document from a TOML file.
    pub fn load<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::load_str(&content)
    }

    /// Load a configuration document from a string.
    pub fn load_str<T: DeserializeOwned>(content: &str) -> Result<T, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}
