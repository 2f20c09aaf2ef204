//! OS signal handling.
//!
//! # Responsibilities
//! - Translate SIGINT/SIGTERM into shutdown phases
//! - First signal starts graceful shutdown, a second one force-closes
//!   in-flight sessions

use crate::lifecycle::shutdown::Shutdown;

/// Drive `shutdown` from process signals. Runs until the second signal.
pub async fn watch(shutdown: Shutdown) {
    let signal = wait_for_signal().await;
    tracing::info!(signal, "Signal received, starting graceful shutdown");
    shutdown.trigger();

    let signal = wait_for_signal().await;
    tracing::warn!(signal, "Second signal received, closing in-flight sessions");
    shutdown.force_close();
}

/// Resolve with the name of the first termination signal received.
pub async fn wait_for_signal() -> &'static str {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Failed to listen for SIGINT");
                std::future::pending::<()>().await;
            }
            "SIGINT"
        }
        _ = wait_for_sigterm() => "SIGTERM",
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to register SIGTERM handler");
            std::future::pending::<()>().await
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await
}
