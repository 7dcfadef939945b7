//! braid-redis
//!
//! `ListStore` over a Redis server.
//!
//! - Regular commands share one multiplexed connection.
//! - `BRPOPLPUSH` blocks its connection server-side, so each blocking call
//!   borrows a dedicated connection from a small pool.
//! - A dropped connection is reported as `Error` + `Reconnecting { attempt }`
//!   and re-established in the background; success publishes `Connected` and
//!   `Ready`. `quit` ends reconnection for good.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use braid_core::ports::{ConnectionEvent, ListStore, StoreError};
use redis::aio::MultiplexedConnection;
use redis::{Client, ErrorKind, FromRedisValue, RedisError};
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::{debug, info, warn};

/// Delay before the first reconnect attempt; grows linearly per attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(250);

const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(5);

struct Inner {
    client: Client,
    conn: RwLock<Option<MultiplexedConnection>>,
    /// Idle connections for blocking commands.
    blocking: Mutex<Vec<MultiplexedConnection>>,
    connected: AtomicBool,
    closed: AtomicBool,
    reconnecting: AtomicBool,
    lifecycle: broadcast::Sender<ConnectionEvent>,
    reconnect_delay: Duration,
}

impl Inner {
    fn signal(&self, event: ConnectionEvent) {
        let _ = self.lifecycle.send(event);
    }
}

/// Redis-backed `ListStore`.
#[derive(Clone)]
pub struct RedisListStore {
    inner: Arc<Inner>,
}

impl RedisListStore {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(connect_error)?;
        Self::from_client(client, DEFAULT_RECONNECT_DELAY).await
    }

    pub async fn from_client(client: Client, reconnect_delay: Duration) -> Result<Self, StoreError> {
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(connect_error)?;

        let (lifecycle, _rx) = broadcast::channel(64);
        let inner = Arc::new(Inner {
            client,
            conn: RwLock::new(Some(conn)),
            blocking: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            reconnecting: AtomicBool::new(false),
            lifecycle,
            reconnect_delay,
        });
        info!("connected to redis");
        inner.signal(ConnectionEvent::Connected);
        inner.signal(ConnectionEvent::Ready);
        Ok(Self { inner })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, StoreError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        self.inner
            .conn
            .read()
            .await
            .clone()
            .ok_or(StoreError::Disconnected)
    }

    async fn run<T: FromRedisValue>(
        &self,
        command: &'static str,
        cmd: &redis::Cmd,
    ) -> Result<T, StoreError> {
        let mut conn = self.connection().await?;
        cmd.query_async(&mut conn)
            .await
            .map_err(|err| self.fail(command, err))
    }

    async fn checkout_blocking(&self) -> Result<MultiplexedConnection, StoreError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        if !self.inner.connected.load(Ordering::SeqCst) {
            return Err(StoreError::Disconnected);
        }
        if let Some(conn) = self.inner.blocking.lock().await.pop() {
            return Ok(conn);
        }
        self.inner
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|err| self.fail("BRPOPLPUSH", err))
    }

    async fn checkin_blocking(&self, conn: MultiplexedConnection) {
        if self.inner.connected.load(Ordering::SeqCst) {
            self.inner.blocking.lock().await.push(conn);
        }
    }

    fn fail(&self, command: &'static str, err: RedisError) -> StoreError {
        if is_connection_loss(&err) {
            let message = err.to_string();
            self.connection_lost(&message);
            StoreError::ConnectionLost(message)
        } else {
            StoreError::Command {
                command,
                message: err.to_string(),
            }
        }
    }

    fn connection_lost(&self, message: &str) {
        if self.inner.closed.load(Ordering::SeqCst) {
            return;
        }
        self.inner.connected.store(false, Ordering::SeqCst);
        warn!(error = %message, "redis connection lost");
        self.inner.signal(ConnectionEvent::Error(message.to_string()));

        if !self.inner.reconnecting.swap(true, Ordering::SeqCst) {
            tokio::spawn(reconnect(Arc::clone(&self.inner)));
        }
    }
}

async fn reconnect(inner: Arc<Inner>) {
    inner.conn.write().await.take();
    inner.blocking.lock().await.clear();

    let mut attempt: u32 = 0;
    while !inner.closed.load(Ordering::SeqCst) {
        attempt = attempt.saturating_add(1);
        inner.signal(ConnectionEvent::Reconnecting { attempt });

        let delay = inner
            .reconnect_delay
            .saturating_mul(attempt)
            .min(MAX_RECONNECT_DELAY);
        tokio::time::sleep(delay).await;
        if inner.closed.load(Ordering::SeqCst) {
            break;
        }

        match inner.client.get_multiplexed_async_connection().await {
            Ok(conn) => {
                *inner.conn.write().await = Some(conn);
                inner.connected.store(true, Ordering::SeqCst);
                info!(attempt, "reconnected to redis");
                inner.signal(ConnectionEvent::Connected);
                inner.signal(ConnectionEvent::Ready);
                break;
            }
            Err(err) => {
                warn!(attempt, error = %err, "redis reconnect failed");
                inner.signal(ConnectionEvent::Error(err.to_string()));
            }
        }
    }

    inner.reconnecting.store(false, Ordering::SeqCst);
}

/// Errors after which the connection cannot be trusted.
fn is_connection_loss(err: &RedisError) -> bool {
    err.kind() == ErrorKind::IoError
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_timeout()
}

fn connect_error(err: RedisError) -> StoreError {
    if is_connection_loss(&err) {
        StoreError::ConnectionLost(err.to_string())
    } else {
        StoreError::Command {
            command: "CONNECT",
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl ListStore for RedisListStore {
    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst) && !self.inner.closed.load(Ordering::SeqCst)
    }

    fn lifecycle(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.lifecycle.subscribe()
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<i64, StoreError> {
        self.run("LPUSH", redis::cmd("LPUSH").arg(key).arg(value))
            .await
    }

    async fn brpoplpush(
        &self,
        source: &str,
        destination: &str,
        timeout: Duration,
    ) -> Result<Option<String>, StoreError> {
        let mut conn = self.checkout_blocking().await?;
        // fractional seconds; 0 blocks until an element arrives
        let moved: Result<Option<String>, RedisError> = redis::cmd("BRPOPLPUSH")
            .arg(source)
            .arg(destination)
            .arg(timeout.as_secs_f64())
            .query_async(&mut conn)
            .await;

        match moved {
            Ok(value) => {
                self.checkin_blocking(conn).await;
                Ok(value)
            }
            Err(err) => Err(self.fail("BRPOPLPUSH", err)),
        }
    }

    async fn lrem(&self, key: &str, count: i64, value: &str) -> Result<u64, StoreError> {
        self.run("LREM", redis::cmd("LREM").arg(key).arg(count).arg(value))
            .await
    }

    async fn llen(&self, key: &str) -> Result<u64, StoreError> {
        self.run("LLEN", redis::cmd("LLEN").arg(key)).await
    }

    async fn lindex(&self, key: &str, index: i64) -> Result<Option<String>, StoreError> {
        self.run("LINDEX", redis::cmd("LINDEX").arg(key).arg(index))
            .await
    }

    async fn quit(&self) -> Result<(), StoreError> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        self.inner.connected.store(false, Ordering::SeqCst);
        let conn = self.inner.conn.write().await.take();
        self.inner.blocking.lock().await.clear();

        if let Some(mut conn) = conn {
            let reply: Result<(), RedisError> = redis::cmd("QUIT").query_async(&mut conn).await;
            if let Err(err) = reply {
                debug!(error = %err, "QUIT failed, dropping the connection");
            }
        }

        info!("redis connection closed");
        self.inner.signal(ConnectionEvent::Closed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_core::{Consumer, Producer, Queue, QueueConfig};
    use std::io;

    #[test]
    fn io_failures_count_as_connection_loss() {
        let reset = RedisError::from(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert!(is_connection_loss(&reset));
        assert!(matches!(connect_error(reset), StoreError::ConnectionLost(_)));
    }

    #[test]
    fn reply_errors_are_command_failures() {
        let wrong_type = RedisError::from((ErrorKind::TypeError, "unexpected reply"));
        assert!(!is_connection_loss(&wrong_type));
        assert!(matches!(
            connect_error(wrong_type),
            StoreError::Command {
                command: "CONNECT",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn invalid_url_is_rejected() {
        let err = RedisListStore::connect("definitely not a url")
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            StoreError::Command {
                command: "CONNECT",
                ..
            }
        ));
    }

    /// Runs only when `REDIS_URL` points at a scratch server.
    #[tokio::test]
    async fn live_reliable_queue_roundtrip() {
        let Ok(url) = std::env::var("REDIS_URL") else {
            return;
        };
        let name = format!("braid-test:{}", std::process::id());
        let store = Arc::new(RedisListStore::connect(&url).await.unwrap());
        let queue = Queue::new(store.clone(), QueueConfig::new(name.as_str())).unwrap();
        let producer = Producer::new(queue.clone());
        let consumer = Consumer::new(queue.clone()).with_idle_timeout(Duration::from_secs(1));

        producer
            .push(&serde_json::json!({"hello": "redis"}))
            .await
            .unwrap();
        assert_eq!(queue.pending().await.unwrap(), 1);

        let task = consumer.pop().await.unwrap().unwrap();
        assert_eq!(queue.processing().await.unwrap(), 1);
        assert_eq!(
            store.lindex(queue.work_key(), -1).await.unwrap().as_deref(),
            task.claim()
        );

        assert_eq!(consumer.ack(&task).await.unwrap(), 1);
        assert_eq!(queue.processing().await.unwrap(), 0);
        assert!(consumer.pop().await.unwrap().is_none());

        queue.stop().await.unwrap();
        assert!(!store.is_connected());
    }
}
