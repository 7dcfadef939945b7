//! InMemoryListStore - list store for development and tests.
//!
//! Lists keep their head at the front of a `VecDeque`. Blocking pops park on
//! a `Notify` that every push and lifecycle change wakes.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify, broadcast};
use tokio::time::Instant;

use crate::ports::{ConnectionEvent, ListStore, StoreError};

/// In-memory `ListStore` with hooks to simulate connection trouble.
pub struct InMemoryListStore {
    lists: Mutex<HashMap<String, VecDeque<String>>>,
    notify: Notify,
    connected: AtomicBool,
    closed: AtomicBool,
    reconnects: AtomicU32,
    lifecycle: broadcast::Sender<ConnectionEvent>,
}

impl InMemoryListStore {
    pub fn new() -> Self {
        let (lifecycle, _rx) = broadcast::channel(64);
        Self {
            lists: Mutex::new(HashMap::new()),
            notify: Notify::new(),
            connected: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            reconnects: AtomicU32::new(0),
            lifecycle,
        }
    }

    /// Drop the connection and announce a reconnect attempt.
    pub fn simulate_reconnecting(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let attempt = self.reconnects.fetch_add(1, Ordering::SeqCst) + 1;
        self.signal(ConnectionEvent::Reconnecting { attempt });
        self.notify.notify_waiters();
    }

    /// Restore the connection. No effect after `quit`.
    pub fn simulate_ready(&self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.connected.store(true, Ordering::SeqCst);
        self.signal(ConnectionEvent::Ready);
    }

    pub fn simulate_error(&self, message: impl Into<String>) {
        self.signal(ConnectionEvent::Error(message.into()));
    }

    /// Current contents of `key`, head first.
    pub async fn contents(&self, key: &str) -> Vec<String> {
        let lists = self.lists.lock().await;
        lists
            .get(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn signal(&self, event: ConnectionEvent) {
        let _ = self.lifecycle.send(event);
    }

    fn ensure_connected(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(StoreError::Disconnected);
        }
        Ok(())
    }
}

impl Default for InMemoryListStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ListStore for InMemoryListStore {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }

    fn lifecycle(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.lifecycle.subscribe()
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<i64, StoreError> {
        self.ensure_connected()?;
        let length = {
            let mut lists = self.lists.lock().await;
            let list = lists.entry(key.to_string()).or_default();
            list.push_front(value.to_string());
            list.len()
        };
        self.notify.notify_waiters();
        Ok(length as i64)
    }

    async fn brpoplpush(
        &self,
        source: &str,
        destination: &str,
        timeout: Duration,
    ) -> Result<Option<String>, StoreError> {
        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);

        loop {
            // register before checking so a push in between is not missed
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.ensure_connected()?;
            {
                let mut lists = self.lists.lock().await;
                if let Some(value) = lists.get_mut(source).and_then(VecDeque::pop_back) {
                    lists
                        .entry(destination.to_string())
                        .or_default()
                        .push_front(value.clone());
                    return Ok(Some(value));
                }
            }

            match deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = &mut notified => {},
                        _ = tokio::time::sleep_until(deadline) => return Ok(None),
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn lrem(&self, key: &str, count: i64, value: &str) -> Result<u64, StoreError> {
        self.ensure_connected()?;
        let mut lists = self.lists.lock().await;
        let Some(list) = lists.get_mut(key) else {
            return Ok(0);
        };

        // count > 0: from the head, count < 0: from the tail, 0: all
        let limit = if count == 0 {
            usize::MAX
        } else {
            count.unsigned_abs() as usize
        };
        let mut removed = 0usize;
        if count >= 0 {
            let mut i = 0;
            while i < list.len() && removed < limit {
                if list[i] == value {
                    list.remove(i);
                    removed += 1;
                } else {
                    i += 1;
                }
            }
        } else {
            let mut i = list.len();
            while i > 0 && removed < limit {
                i -= 1;
                if list[i] == value {
                    list.remove(i);
                    removed += 1;
                }
            }
        }
        Ok(removed as u64)
    }

    async fn llen(&self, key: &str) -> Result<u64, StoreError> {
        self.ensure_connected()?;
        let lists = self.lists.lock().await;
        Ok(lists.get(key).map_or(0, VecDeque::len) as u64)
    }

    async fn lindex(&self, key: &str, index: i64) -> Result<Option<String>, StoreError> {
        self.ensure_connected()?;
        let lists = self.lists.lock().await;
        let Some(list) = lists.get(key) else {
            return Ok(None);
        };
        let len = list.len() as i64;
        let position = if index < 0 { len + index } else { index };
        if !(0..len).contains(&position) {
            return Ok(None);
        }
        Ok(list.get(position as usize).cloned())
    }

    async fn quit(&self) -> Result<(), StoreError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        self.connected.store(false, Ordering::SeqCst);
        self.signal(ConnectionEvent::Closed);
        self.notify.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn push_then_move_is_fifo() {
        let store = InMemoryListStore::new();
        assert_eq!(store.lpush("q", "a").await.unwrap(), 1);
        assert_eq!(store.lpush("q", "b").await.unwrap(), 2);

        let first = store.brpoplpush("q", "q:active", Duration::from_secs(1)).await.unwrap();
        assert_eq!(first.as_deref(), Some("a"));
        assert_eq!(store.contents("q").await, vec!["b"]);
        assert_eq!(store.contents("q:active").await, vec!["a"]);

        let second = store.brpoplpush("q", "q:active", Duration::from_secs(1)).await.unwrap();
        assert_eq!(second.as_deref(), Some("b"));
        assert_eq!(store.contents("q:active").await, vec!["b", "a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn blocking_move_times_out() {
        let store = InMemoryListStore::new();
        let start = Instant::now();

        let moved = store
            .brpoplpush("q", "q:active", Duration::from_millis(500))
            .await
            .unwrap();

        assert_eq!(moved, None);
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn push_wakes_blocked_move() {
        let store = Arc::new(InMemoryListStore::new());

        let waiter = tokio::spawn({
            let store = store.clone();
            async move {
                store
                    .brpoplpush("q", "q:active", Duration::from_secs(5))
                    .await
                    .unwrap()
            }
        });

        tokio::time::sleep(Duration::from_millis(500)).await;
        store.lpush("q", "late").await.unwrap();

        assert_eq!(waiter.await.unwrap().as_deref(), Some("late"));
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_interrupts_blocked_move() {
        let store = Arc::new(InMemoryListStore::new());

        let waiter = tokio::spawn({
            let store = store.clone();
            async move { store.brpoplpush("q", "q:active", Duration::ZERO).await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        store.simulate_reconnecting();

        assert_eq!(waiter.await.unwrap(), Err(StoreError::Disconnected));
    }

    #[tokio::test]
    async fn lrem_follows_count_direction() {
        let store = InMemoryListStore::new();
        for value in ["x", "y", "x", "x"] {
            store.lpush("l", value).await.unwrap();
        }
        // head first: x x y x
        assert_eq!(store.lrem("l", -1, "x").await.unwrap(), 1);
        assert_eq!(store.contents("l").await, vec!["x", "x", "y"]);

        assert_eq!(store.lrem("l", 1, "x").await.unwrap(), 1);
        assert_eq!(store.contents("l").await, vec!["x", "y"]);

        store.lpush("l", "x").await.unwrap();
        assert_eq!(store.lrem("l", 0, "x").await.unwrap(), 2);
        assert_eq!(store.contents("l").await, vec!["y"]);

        assert_eq!(store.lrem("missing", 0, "x").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn lindex_counts_negative_from_tail() {
        let store = InMemoryListStore::new();
        store.lpush("l", "oldest").await.unwrap();
        store.lpush("l", "newest").await.unwrap();

        assert_eq!(store.lindex("l", 0).await.unwrap().as_deref(), Some("newest"));
        assert_eq!(store.lindex("l", -1).await.unwrap().as_deref(), Some("oldest"));
        assert_eq!(store.lindex("l", 2).await.unwrap(), None);
        assert_eq!(store.lindex("l", -3).await.unwrap(), None);
        assert_eq!(store.lindex("missing", -1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn lifecycle_signals_follow_connection_state() {
        let store = InMemoryListStore::new();
        let mut lifecycle = store.lifecycle();

        store.simulate_reconnecting();
        assert!(!store.is_connected());
        assert_eq!(store.llen("q").await, Err(StoreError::Disconnected));

        store.simulate_ready();
        assert!(store.is_connected());

        store.quit().await.unwrap();
        assert!(!store.is_connected());
        assert_eq!(store.lpush("q", "v").await, Err(StoreError::Closed));
        assert_eq!(store.quit().await, Err(StoreError::Closed));

        // ready after quit does not reopen
        store.simulate_ready();
        assert!(!store.is_connected());

        assert_eq!(
            lifecycle.try_recv().unwrap(),
            ConnectionEvent::Reconnecting { attempt: 1 }
        );
        assert_eq!(lifecycle.try_recv().unwrap(), ConnectionEvent::Ready);
        assert_eq!(lifecycle.try_recv().unwrap(), ConnectionEvent::Closed);
        assert!(lifecycle.try_recv().is_err());
    }
}
