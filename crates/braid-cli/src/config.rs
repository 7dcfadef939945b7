//! Configuration file for the braid binary.

use braid_core::QueueConfig;
use serde::Deserialize;

/// `braid.toml`:
///
/// ```toml
/// redis_url = "redis://127.0.0.1:6379"
///
/// [queue]
/// name = "emails"
/// max_size = 1000
/// ```
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct BraidConfig {
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    pub queue: QueueConfig,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
