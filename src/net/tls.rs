//! TLS configuration, certificate loading and handshakes.
//!
//! # Responsibilities
//! - Load the certificate chain and private key once at startup
//! - Refuse to start when files are missing or the key does not match
//! - Terminate TLS on inbound sockets with a bounded handshake

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::ServerConfig;
use rustls::sign::CertifiedKey;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

use crate::observability::metrics;

/// Errors raised while loading certificates or handshaking.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to load certificate material from {path:?}: {reason}")]
    CertificateLoad { path: PathBuf, reason: String },
    #[error("TLS handshake timed out")]
    HandshakeTimeout,
    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] std::io::Error),
}

impl TlsError {
    fn load(path: &Path, reason: impl ToString) -> Self {
        TlsError::CertificateLoad {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

/// Handshake counters, shared by every connection on the TLS listener.
#[derive(Debug, Default)]
pub struct TlsStats {
    pub handshakes_completed: AtomicU64,
    pub handshakes_failed: AtomicU64,
}

/// Immutable server-side TLS state; cheap to clone.
#[derive(Clone)]
pub struct TlsContext {
    acceptor: TlsAcceptor,
    handshake_timeout: Duration,
    stats: Arc<TlsStats>,
}

impl std::fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsContext")
            .field("handshake_timeout", &self.handshake_timeout)
            .finish_non_exhaustive()
    }
}

impl TlsContext {
    /// Load and verify a PEM certificate chain and private key.
    pub fn load(cert_path: &Path, key_path: &Path, handshake_timeout: Duration) -> Result<Self, TlsError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());

        let certs = load_certs(cert_path)?;
        let key = load_key(key_path)?;

        // Checks that the private key belongs to the leaf certificate.
        let certified = CertifiedKey::from_der(certs.clone(), key.clone_key(), &provider)
            .map_err(|e| TlsError::load(key_path, e))?;
        check_key_match(&certified, key_path)?;

        let config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| TlsError::load(cert_path, e))?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| TlsError::load(cert_path, e))?;

        tracing::info!(
            cert_path = %cert_path.display(),
            key_path = %key_path.display(),
            "TLS certificate loaded"
        );

        Ok(Self {
            acceptor: TlsAcceptor::from(Arc::new(config)),
            handshake_timeout,
            stats: Arc::new(TlsStats::default()),
        })
    }

    /// Perform the server handshake on `stream`.
    ///
    /// Failures are counted and returned; the caller drops the socket.
    pub async fn accept<IO>(&self, stream: IO) -> Result<TlsStream<IO>, TlsError>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        let result = match time::timeout(self.handshake_timeout, self.acceptor.accept(stream)).await {
            Ok(Ok(tls)) => Ok(tls),
            Ok(Err(e)) => Err(TlsError::Handshake(e)),
            Err(_) => Err(TlsError::HandshakeTimeout),
        };

        match &result {
            Ok(_) => {
                self.stats.handshakes_completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.stats.handshakes_failed.fetch_add(1, Ordering::Relaxed);
                metrics::record_tls_handshake_failure();
            }
        }
        result
    }

    pub fn stats(&self) -> &Arc<TlsStats> {
        &self.stats
    }
}

fn check_key_match(certified: &CertifiedKey, key_path: &Path) -> Result<(), TlsError> {
    use rustls::{Error, InconsistentKeys};

    match certified.keys_match() {
        Ok(()) => Ok(()),
        // The signing key cannot expose its public half; nothing to compare.
        Err(Error::InconsistentKeys(InconsistentKeys::Unknown)) => Ok(()),
        Err(e) => Err(TlsError::load(key_path, e)),
    }
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::load(path, e))?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::load(path, format!("failed to parse certificate: {}", e)))?;

    if certs.is_empty() {
        return Err(TlsError::load(path, "no certificates found"));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::load(path, e))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| TlsError::load(path, format!("failed to parse private key: {}", e)))?
        .ok_or_else(|| TlsError::load(path, "no private key found"))
}
