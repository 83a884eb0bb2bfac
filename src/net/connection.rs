//! Connection identity and lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Count live connections for graceful shutdown
//! - Receive the once-per-connection "finished" notification from sessions

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Receives the notification that a connection has been released.
///
/// Sessions call this exactly once per connection, whether the session ended
/// cleanly or on an error.
pub trait ConnectionObserver: Send + Sync {
    fn connection_finished(&self, id: ConnectionId);
}

/// Tracks active connections for graceful shutdown.
///
/// Uses a watch channel to signal when the active count changes.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    inner: Arc<TrackerInner>,
}

#[derive(Debug)]
struct TrackerInner {
    /// Current count of active connections.
    active: watch::Sender<u64>,
    /// Connections that have reported finished.
    finished: AtomicU64,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        let (active, _) = watch::channel(0);
        Self {
            inner: Arc::new(TrackerInner {
                active,
                finished: AtomicU64::new(0),
            }),
        }
    }

    /// Record a new active connection and return its ID.
    pub fn open(&self) -> ConnectionId {
        self.inner.active.send_modify(|count| *count += 1);
        ConnectionId::new()
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> u64 {
        *self.inner.active.borrow()
    }

    /// Total connections that have finished since the tracker was created.
    pub fn finished_count(&self) -> u64 {
        self.inner.finished.load(Ordering::SeqCst)
    }

    /// Wait until no connections are active.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.active.subscribe();
        // The sender lives in `self`, so this cannot fail.
        let _ = rx.wait_for(|count| *count == 0).await;
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionObserver for ConnectionTracker {
    fn connection_finished(&self, id: ConnectionId) {
        self.inner
            .active
            .send_modify(|count| *count = count.saturating_sub(1));
        self.inner.finished.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(connection_id = %id, "Connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn connection_tracker_counts() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.active_count(), 0);

        let id1 = tracker.open();
        assert_eq!(tracker.active_count(), 1);

        let id2 = tracker.open();
        assert_eq!(tracker.active_count(), 2);

        tracker.connection_finished(id1);
        assert_eq!(tracker.active_count(), 1);

        tracker.connection_finished(id2);
        assert_eq!(tracker.active_count(), 0);
        assert_eq!(tracker.finished_count(), 2);
    }

    #[tokio::test]
    async fn wait_idle_resolves_when_last_connection_finishes() {
        let tracker = ConnectionTracker::new();
        let id = tracker.open();

        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.wait_idle().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        tracker.connection_finished(id);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait_idle should resolve")
            .unwrap();
    }
}
