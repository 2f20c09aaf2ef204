//! Proxy server: listeners, accept loops and shutdown sequencing.
//!
//! # Data Flow
//! ```text
//! ProxyServer::bind(config)
//!     → build registry, load TLS, bind listeners (fail fast)
//! ProxyServer::run(shutdown)
//!     → health monitor + admin API + one accept loop per listener
//!     → per connection: [TLS handshake] → session::run
//!     → on stop: close listeners, drain sessions, force close after grace
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::admin::{self, AdminState};
use crate::config::validation::validate_config;
use crate::config::{ConfigError, ProxyConfig};
use crate::health::HealthMonitor;
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::startup::{build_registry, load_tls, StartupError};
use crate::load_balancer::registry::Registry;
use crate::load_balancer::Selector;
use crate::net::connection::ConnectionTracker;
use crate::net::listener::{Listener, ListenerError};
use crate::net::tls::{TlsContext, TlsStats};
use crate::proxy::session::{self, ProxyContext};

/// How long force-closed sessions get to unwind before `run` returns.
const FORCE_CLOSE_WAIT: Duration = Duration::from_secs(5);

/// A bound, not yet running, proxy.
pub struct ProxyServer {
    config: ProxyConfig,
    registry: Arc<Registry>,
    tls: Option<TlsContext>,
    plain: Option<Listener>,
    secure: Option<Listener>,
    admin: Option<TcpListener>,
    tracker: ConnectionTracker,
}

impl ProxyServer {
    /// Validate `config`, build the registry, load TLS and bind every listener.
    ///
    /// Nothing is served until [`ProxyServer::run`] is called.
    pub async fn bind(config: ProxyConfig) -> Result<Self, StartupError> {
        validate_config(&config).map_err(ConfigError::Validation)?;

        let registry = Arc::new(build_registry(&config.backends)?);
        let tls = load_tls(&config)?;

        let limit = Arc::new(Semaphore::new(config.listener.max_connections));
        let plain = match &config.listener.plain_address {
            Some(addr) => Some(Listener::bind("plain", addr, Arc::clone(&limit)).await?),
            None => None,
        };
        let secure = match &config.listener.tls_address {
            Some(addr) => Some(Listener::bind("tls", addr, Arc::clone(&limit)).await?),
            None => None,
        };

        let admin = if config.admin.enabled {
            let listener = TcpListener::bind(&config.admin.bind_address)
                .await
                .map_err(StartupError::Admin)?;
            tracing::info!(
                address = %listener.local_addr().map_err(StartupError::Admin)?,
                "Admin API bound"
            );
            Some(listener)
        } else {
            None
        };

        Ok(Self {
            config,
            registry,
            tls,
            plain,
            secure,
            admin,
            tracker: ConnectionTracker::new(),
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    pub fn plain_addr(&self) -> Option<SocketAddr> {
        self.plain.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn tls_addr(&self) -> Option<SocketAddr> {
        self.secure.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn admin_addr(&self) -> Option<SocketAddr> {
        self.admin.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn tls_stats(&self) -> Option<Arc<TlsStats>> {
        self.tls.as_ref().map(|tls| Arc::clone(tls.stats()))
    }

    /// Serve until `shutdown` is triggered, then drain in-flight sessions.
    pub async fn run(self, shutdown: Shutdown) {
        let stop = shutdown.subscribe();
        let grace = self.config.timeouts.shutdown_grace();

        let ctx = Arc::new(ProxyContext {
            selector: Selector::new(Arc::clone(&self.registry), self.config.load_balancing.policy),
            timeouts: self.config.timeouts.clone(),
            protocol: self.config.listener.protocol,
            force_close: shutdown.force_token(),
            failure_cooldown: (!self.config.health_check.enabled)
                .then(|| self.config.health_check.failure_cooldown()),
        });

        let mut tasks = JoinSet::new();

        let monitor = HealthMonitor::new(Arc::clone(&self.registry), self.config.health_check.clone());
        tasks.spawn(monitor.run(stop.clone()));

        if let Some(listener) = self.admin {
            let state = AdminState::new(
                Arc::clone(&self.registry),
                self.tracker.clone(),
                self.tls.as_ref().map(|tls| Arc::clone(tls.stats())),
                &self.config.admin.api_key,
            );
            let stop = stop.clone();
            tasks.spawn(async move {
                if let Err(e) = admin::serve(listener, state, stop).await {
                    tracing::error!(error = %e, "Admin API failed");
                }
            });
        }

        if let Some(listener) = self.plain {
            tasks.spawn(accept_loop(listener, None, Arc::clone(&ctx), self.tracker.clone(), stop.clone()));
        }
        if let Some(listener) = self.secure {
            tasks.spawn(accept_loop(
                listener,
                self.tls.clone(),
                Arc::clone(&ctx),
                self.tracker.clone(),
                stop.clone(),
            ));
        }

        tracing::info!(backends = self.registry.len(), "Proxy running");
        stop.cancelled().await;

        tracing::info!(
            active_sessions = self.tracker.active_count(),
            grace_secs = grace.as_secs(),
            "Draining sessions"
        );
        if !self.tracker.wait_idle(grace).await {
            tracing::warn!(
                remaining = self.tracker.active_count(),
                "Grace period elapsed, closing remaining sessions"
            );
            shutdown.force_close();
            if !self.tracker.wait_idle(FORCE_CLOSE_WAIT).await {
                tracing::error!(remaining = self.tracker.active_count(), "Sessions did not close");
            }
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Background task failed");
            }
        }
        tracing::info!("Proxy stopped");
    }
}

/// Accept connections on `listener` until `stop` fires.
///
/// The listener socket is closed when the loop returns.
async fn accept_loop(
    listener: Listener,
    tls: Option<TlsContext>,
    ctx: Arc<ProxyContext>,
    tracker: ConnectionTracker,
    stop: CancellationToken,
) {
    let name = listener.name();

    loop {
        let accepted = tokio::select! {
            _ = stop.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer, permit) = match accepted {
            Ok(accepted) => accepted,
            Err(ListenerError::Closed) => break,
            Err(e) => {
                tracing::error!(listener = name, error = %e, "Accept error");
                // Brief sleep to avoid tight loop on persistent errors
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };

        let guard = tracker.track();
        let id = guard.id();
        let ctx = Arc::clone(&ctx);
        let tls = tls.clone();

        tokio::spawn(
            async move {
                let _permit = permit;
                let _guard = guard;
                match tls {
                    None => {
                        session::run(&ctx, stream, peer, id).await;
                    }
                    Some(tls) => match tls.accept(stream).await {
                        Ok(stream) => {
                            session::run(&ctx, stream, peer, id).await;
                        }
                        Err(e) => tracing::warn!(error = %e, "TLS handshake failed"),
                    },
                }
            }
            .instrument(tracing::info_span!("connection", id = %id, peer = %peer, listener = name)),
        );
    }

    tracing::info!(listener = name, "Listener stopped accepting");
}
