//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the backend registry from validated configuration
//! - Load TLS material before any listener is bound
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listeners bind last (traffic only when ready)

use std::path::Path;
use thiserror::Error;

use crate::config::{BackendConfig, ConfigError, ProxyConfig};
use crate::load_balancer::registry::{Registry, RegistryError};
use crate::net::listener::ListenerError;
use crate::net::tls::{TlsContext, TlsError};

/// Anything that prevents the proxy from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Tls(#[from] TlsError),
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error("a TLS listener is configured but the [tls] section is missing")]
    TlsNotConfigured,
    #[error("failed to bind admin API: {0}")]
    Admin(#[source] std::io::Error),
}

/// Register every configured backend, in order.
pub fn build_registry(backends: &[BackendConfig]) -> Result<Registry, RegistryError> {
    let mut registry = Registry::new();
    for backend in backends {
        registry.register(&backend.host, backend.port)?;
    }
    tracing::info!(backends = registry.len(), "Backend registry built");
    Ok(registry)
}

/// Load certificate material when a TLS listener is configured.
pub fn load_tls(config: &ProxyConfig) -> Result<Option<TlsContext>, StartupError> {
    if config.listener.tls_address.is_none() {
        return Ok(None);
    }
    let tls = config.tls.as_ref().ok_or(StartupError::TlsNotConfigured)?;
    let context = TlsContext::load(
        Path::new(&tls.cert_path),
        Path::new(&tls.key_path),
        tls.handshake_timeout(),
    )?;
    Ok(Some(context))
}
