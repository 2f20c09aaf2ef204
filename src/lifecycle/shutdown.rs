//! Shutdown coordination for the proxy.
//!
//! Two phases:
//! - `stop`: listeners stop accepting, background tasks exit, in-flight
//!   sessions keep relaying
//! - `force`: in-flight sessions are closed once the grace period ends

use tokio_util::sync::CancellationToken;

/// Coordinator for graceful shutdown.
///
/// Tokens stay cancelled once triggered, so tasks that subscribe late still
/// observe the signal.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    stop: CancellationToken,
    force: CancellationToken,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled when the graceful phase begins.
    pub fn subscribe(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Token cancelled when in-flight sessions must be closed.
    pub fn force_token(&self) -> CancellationToken {
        self.force.clone()
    }

    /// Begin graceful shutdown.
    pub fn trigger(&self) {
        if !self.stop.is_cancelled() {
            tracing::info!("Shutdown triggered");
        }
        self.stop.cancel();
    }

    /// Close every in-flight session. Implies [`Shutdown::trigger`].
    pub fn force_close(&self) {
        self.trigger();
        self.force.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.stop.is_cancelled()
    }
}
