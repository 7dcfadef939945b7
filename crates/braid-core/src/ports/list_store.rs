//! ListStore port - the remote list store (Redis or in-memory).
//!
//! Lists have a head (LPUSH side) and a tail (RPOP side). The reliable queue
//! pattern pushes to the head of *pending* and atomically moves the tail of
//! *pending* onto the head of *active*.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

/// Connection lifecycle signals the store publishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Socket established.
    Connected,

    /// Ready to accept commands.
    Ready,

    /// Connection lost, a reconnect attempt is underway.
    Reconnecting { attempt: u32 },

    /// Non-terminal store error.
    Error(String),

    /// Connection closed for good.
    Closed,
}

/// Store command failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No usable connection right now (reconnecting).
    #[error("store connection is unavailable")]
    Disconnected,

    /// The connection dropped while the command was in flight.
    #[error("store connection lost: {0}")]
    ConnectionLost(String),

    /// `quit` was called.
    #[error("store connection is closed")]
    Closed,

    #[error("store command {command} failed: {message}")]
    Command {
        command: &'static str,
        message: String,
    },
}

impl StoreError {
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            StoreError::Disconnected | StoreError::ConnectionLost(_) | StoreError::Closed
        )
    }
}

/// List operations the queue needs, plus connection lifecycle.
///
/// # Design
/// - One logical connection per store; the queue owns the store.
/// - `brpoplpush` is atomic: at most one caller receives a given element.
/// - A zero `timeout` on `brpoplpush` blocks until an element arrives.
#[async_trait]
pub trait ListStore: Send + Sync {
    /// Whether commands can currently be issued.
    fn is_connected(&self) -> bool;

    /// Subscribe to lifecycle signals.
    fn lifecycle(&self) -> broadcast::Receiver<ConnectionEvent>;

    /// LPUSH: returns the new list length.
    async fn lpush(&self, key: &str, value: &str) -> Result<i64, StoreError>;

    /// BRPOPLPUSH: `None` when `timeout` elapses with nothing to move.
    async fn brpoplpush(
        &self,
        source: &str,
        destination: &str,
        timeout: Duration,
    ) -> Result<Option<String>, StoreError>;

    /// LREM: returns how many elements were removed.
    async fn lrem(&self, key: &str, count: i64, value: &str) -> Result<u64, StoreError>;

    /// LLEN
    async fn llen(&self, key: &str) -> Result<u64, StoreError>;

    /// LINDEX: negative indexes count from the tail.
    async fn lindex(&self, key: &str, index: i64) -> Result<Option<String>, StoreError>;

    /// Close the connection gracefully; publishes `Closed`.
    async fn quit(&self) -> Result<(), StoreError>;
}
