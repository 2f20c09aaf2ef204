//! Connection identity and lifecycle tracking.
//!
//! # Responsibilities
//! - Assign every accepted connection an id used in its tracing span
//! - Count live sessions so shutdown can wait for them to drain

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::observability::metrics;

/// Process-wide id source; ids only need to be unique.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Default)]
struct Live {
    count: AtomicU64,
    drained: Notify,
}

/// Counts live connections; cloning shares the count.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    live: Arc<Live>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection. The returned guard unregisters it on drop.
    pub fn track(&self) -> ConnectionGuard {
        let count = self.live.count.fetch_add(1, Ordering::AcqRel) + 1;
        metrics::record_active_sessions(count);
        ConnectionGuard {
            live: Arc::clone(&self.live),
            id: ConnectionId::next(),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.live.count.load(Ordering::Acquire)
    }

    /// Wait for the count to reach zero, up to `limit`.
    ///
    /// Returns false if connections were still open when `limit` elapsed.
    pub async fn wait_idle(&self, limit: Duration) -> bool {
        let drained = async {
            loop {
                // Register interest before checking so a wake-up between the
                // check and the await is not lost.
                let notified = self.live.drained.notified();
                if self.active_count() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(limit, drained).await.is_ok()
    }
}

/// Keeps one connection counted while alive.
#[derive(Debug)]
pub struct ConnectionGuard {
    live: Arc<Live>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let remaining = self.live.count.fetch_sub(1, Ordering::AcqRel) - 1;
        metrics::record_active_sessions(remaining);
        if remaining == 0 {
            self.live.drained.notify_waiters();
        }
        tracing::trace!(connection_id = %self.id, "Connection released");
    }
}
