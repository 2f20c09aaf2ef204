//! Per-connection session handling.
//!
//! # State Machine
//! ```text
//! Accepted → BackendSelected → Connected → Relaying → Closed
//! Accepted | BackendSelected → Failed → Closed
//! ```
//!
//! An upstream connect failure releases the backend's load, marks it
//! Unhealthy and re-selects exactly once before the session fails. Only a
//! Healthy backend is marked; with active checks off it returns to rotation
//! after `health_check.failure_cooldown_secs`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::config::{ClientProtocol, TimeoutConfig};
use crate::load_balancer::backend::{BackendId, LoadGuard};
use crate::load_balancer::registry::RegistryError;
use crate::load_balancer::{SelectError, Selector};
use crate::net::connection::ConnectionId;
use crate::observability::metrics;
use crate::proxy::relay::{relay, RelayEnd};

/// Selection attempts per session: the first pick plus one re-selection.
const MAX_SELECT_ATTEMPTS: usize = 2;

/// Upper bound for draining a rejected client's request bytes.
const REJECT_DRAIN: Duration = Duration::from_secs(1);

/// Shared, read-only state every session needs.
#[derive(Debug)]
pub struct ProxyContext {
    pub selector: Selector,
    pub timeouts: TimeoutConfig,
    pub protocol: ClientProtocol,
    /// Cancelled when in-flight sessions must be force-closed.
    pub force_close: CancellationToken,
    /// Set when active health checks are off: how long a backend marked down
    /// by a failed connect waits before it is returned to rotation.
    pub failure_cooldown: Option<Duration>,
}

/// A client stream the proxy can serve: plain TCP or TLS over TCP.
pub trait Inbound: AsyncRead + AsyncWrite + Unpin + Send {
    fn tcp(&self) -> &TcpStream;
}

impl Inbound for TcpStream {
    fn tcp(&self) -> &TcpStream {
        self
    }
}

impl Inbound for tokio_rustls::server::TlsStream<TcpStream> {
    fn tcp(&self) -> &TcpStream {
        self.get_ref().0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Accepted,
    BackendSelected,
    Connected,
    Relaying,
    Failed,
    Closed,
}

/// Per-connection failures that prevent relaying.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    NoHealthyBackend(#[from] SelectError),
    #[error("failed to connect to backend {backend}: {reason}")]
    UpstreamConnect { backend: String, reason: String },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl SessionError {
    fn status_line(&self) -> &'static str {
        match self {
            SessionError::NoHealthyBackend(_) => "503 Service Unavailable",
            SessionError::UpstreamConnect { .. } => "502 Bad Gateway",
            SessionError::Registry(_) => "500 Internal Server Error",
        }
    }

    fn outcome(&self) -> SessionOutcome {
        match self {
            SessionError::NoHealthyBackend(_) => SessionOutcome::NoHealthyBackend,
            SessionError::UpstreamConnect { .. } => SessionOutcome::UpstreamConnectFailed,
            SessionError::Registry(_) => SessionOutcome::InternalError,
        }
    }
}

/// Final classification of a session, used in logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed,
    IdleTimeout,
    Shutdown,
    RelayError,
    NoHealthyBackend,
    UpstreamConnectFailed,
    InternalError,
}

impl SessionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionOutcome::Completed => "completed",
            SessionOutcome::IdleTimeout => "idle_timeout",
            SessionOutcome::Shutdown => "shutdown",
            SessionOutcome::RelayError => "relay_error",
            SessionOutcome::NoHealthyBackend => "no_healthy_backend",
            SessionOutcome::UpstreamConnectFailed => "upstream_connect_failed",
            SessionOutcome::InternalError => "internal_error",
        }
    }
}

/// Summary of a finished session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    pub backend: Option<String>,
    pub duration: Duration,
    pub to_backend: u64,
    pub to_client: u64,
    pub outcome: SessionOutcome,
}

struct Session {
    id: ConnectionId,
    peer: SocketAddr,
    state: SessionState,
    backend: Option<String>,
    started: Instant,
}

impl Session {
    fn new(id: ConnectionId, peer: SocketAddr) -> Self {
        Self {
            id,
            peer,
            state: SessionState::Accepted,
            backend: None,
            started: Instant::now(),
        }
    }

    fn advance(&mut self, next: SessionState) {
        tracing::trace!(from = ?self.state, to = ?next, "Session state");
        self.state = next;
    }

    fn finish(mut self, outcome: SessionOutcome, to_backend: u64, to_client: u64) -> SessionReport {
        self.advance(SessionState::Closed);
        let report = SessionReport {
            id: self.id,
            peer: self.peer,
            backend: self.backend,
            duration: self.started.elapsed(),
            to_backend,
            to_client,
            outcome,
        };

        tracing::info!(
            backend = report.backend.as_deref().unwrap_or("-"),
            duration_ms = report.duration.as_millis() as u64,
            bytes_to_backend = report.to_backend,
            bytes_to_client = report.to_client,
            outcome = outcome.as_str(),
            "Session finished"
        );
        metrics::record_session(outcome.as_str(), report.duration, to_backend, to_client);
        report
    }
}

/// Serve one accepted client connection to completion.
pub async fn run<S: Inbound>(ctx: &ProxyContext, client: S, peer: SocketAddr, id: ConnectionId) -> SessionReport {
    let mut session = Session::new(id, peer);

    let (upstream, guard) = match connect_upstream(ctx, &mut session).await {
        Ok(connected) => connected,
        Err(e) => {
            session.advance(SessionState::Failed);
            tracing::warn!(error = %e, "Session failed before relaying");
            reject(ctx.protocol, client, &e).await;
            return session.finish(e.outcome(), 0, 0);
        }
    };

    session.advance(SessionState::Relaying);
    let outcome = relay(client, upstream, ctx.timeouts.idle(), &ctx.force_close).await;

    // Release the backend before logging so the report reflects final load.
    let backend = Arc::clone(guard.backend());
    drop(guard);
    metrics::record_backend_load(&backend.address(), backend.active_connections());

    let result = match outcome.end {
        RelayEnd::Closed => SessionOutcome::Completed,
        RelayEnd::IdleTimeout => SessionOutcome::IdleTimeout,
        RelayEnd::Cancelled => SessionOutcome::Shutdown,
        RelayEnd::Error(e) => {
            tracing::debug!(error = %e, "Relay I/O error");
            SessionOutcome::RelayError
        }
    };
    session.finish(result, outcome.to_backend, outcome.to_client)
}

/// Select a backend and connect to it, re-selecting once on connect failure.
async fn connect_upstream(
    ctx: &ProxyContext,
    session: &mut Session,
) -> Result<(TcpStream, LoadGuard), SessionError> {
    let registry = ctx.selector.registry();
    let mut last_failure = None;

    for attempt in 1..=MAX_SELECT_ATTEMPTS {
        let chosen = match ctx.selector.select() {
            Ok(chosen) => chosen,
            Err(e) => return Err(last_failure.unwrap_or(SessionError::NoHealthyBackend(e))),
        };
        let addr = chosen.address();
        session.backend = Some(addr.clone());
        session.advance(SessionState::BackendSelected);

        let guard = registry.acquire(chosen.id)?;
        metrics::record_backend_load(&addr, guard.active_connections());

        let reason = match time::timeout(
            ctx.timeouts.connect(),
            TcpStream::connect((chosen.host.as_str(), chosen.port)),
        )
        .await
        {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!(error = %e, "Failed to set TCP_NODELAY on upstream");
                }
                session.advance(SessionState::Connected);
                tracing::debug!(backend = %addr, attempt, "Upstream connected");
                return Ok((stream, guard));
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => "connect timed out".to_string(),
        };

        drop(guard);
        tracing::warn!(backend = %addr, attempt, error = %reason, "Upstream connect failed");
        metrics::record_upstream_connect_failure(&addr);
        if registry.mark_unreachable(chosen.id)? {
            if let Some(cooldown) = ctx.failure_cooldown {
                schedule_restore(ctx, chosen.id, cooldown);
            }
        }

        last_failure = Some(SessionError::UpstreamConnect {
            backend: addr,
            reason,
        });
    }

    Err(last_failure.unwrap_or(SessionError::NoHealthyBackend(SelectError::NoHealthyBackend)))
}

/// Return a backend to rotation once `cooldown` elapses, unless it changed
/// state in the meantime.
fn schedule_restore(ctx: &ProxyContext, id: BackendId, cooldown: Duration) {
    let registry = Arc::clone(ctx.selector.registry());
    let stop = ctx.force_close.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = time::sleep(cooldown) => {
                if let Err(e) = registry.restore(id) {
                    tracing::error!(error = %e, "Failed to restore backend after cooldown");
                }
            }
            _ = stop.cancelled() => {}
        }
    });
}

/// Tell the client its connection cannot be served, then close it.
async fn reject<S: Inbound>(protocol: ClientProtocol, mut client: S, err: &SessionError) {
    match protocol {
        ClientProtocol::Http => {
            let body = format!("{}\n", err.status_line());
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                err.status_line(),
                body.len(),
                body
            );
            let reply = async {
                client.write_all(response.as_bytes()).await?;
                client.shutdown().await
            };
            if time::timeout(REJECT_DRAIN, reply).await.is_err() {
                return;
            }
            // Consume the unread request so closing does not turn into a reset.
            let mut sink = [0u8; 4096];
            let _ = time::timeout(REJECT_DRAIN, async {
                while let Ok(n) = client.read(&mut sink).await {
                    if n == 0 {
                        break;
                    }
                }
            })
            .await;
        }
        ClientProtocol::Tcp => {
            if let Err(e) = socket2::SockRef::from(client.tcp()).set_linger(Some(Duration::ZERO)) {
                tracing::debug!(error = %e, "Failed to arm connection reset");
            }
        }
    }
}
