//! TLS termination in front of plaintext backends.

use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use edge_balancer::config::{ProxyConfig, TlsConfig};
use edge_balancer::lifecycle::startup::StartupError;
use edge_balancer::net::tls::TlsError;
use edge_balancer::ProxyServer;

mod common;

struct TestCert {
    cert_pem: String,
    key_pem: String,
    der: CertificateDer<'static>,
}

fn generate() -> TestCert {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    TestCert {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
        der: cert.der().clone(),
    }
}

fn tls_config(mut config: ProxyConfig, dir: &Path, cert_pem: &str, key_pem: &str) -> ProxyConfig {
    let cert_path = dir.join("server.crt");
    let key_path = dir.join("server.key");
    std::fs::write(&cert_path, cert_pem).unwrap();
    std::fs::write(&key_path, key_pem).unwrap();

    config.listener.tls_address = Some("127.0.0.1:0".into());
    config.tls = Some(TlsConfig {
        cert_path: cert_path.to_string_lossy().into_owned(),
        key_path: key_path.to_string_lossy().into_owned(),
        handshake_timeout_secs: 2,
    });
    config
}

fn connector(trusted: &CertificateDer<'static>) -> TlsConnector {
    let mut roots = RootCertStore::empty();
    roots.add(trusted.clone()).unwrap();
    let config = ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

#[tokio::test]
async fn terminates_tls_and_relays_plaintext() {
    let backend = common::start_echo_backend().await;
    let dir = tempfile::tempdir().unwrap();
    let cert = generate();
    let config = tls_config(common::proxy_config(&[backend]), dir.path(), &cert.cert_pem, &cert.key_pem);
    let proxy = common::start_proxy(config).await;

    let tcp = TcpStream::connect(proxy.tls_addr.unwrap()).await.unwrap();
    let name = ServerName::try_from("localhost").unwrap();
    let mut tls = connector(&cert.der).connect(name, tcp).await.unwrap();

    tls.write_all(b"secret payload").await.unwrap();
    let mut buf = [0u8; 14];
    tokio::time::timeout(Duration::from_secs(5), tls.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"secret payload");
    assert_eq!(proxy.registry.snapshot()[0].active_connections, 1);

    let stats = proxy.tls_stats.clone().unwrap();
    assert_eq!(stats.handshakes_completed.load(Ordering::Relaxed), 1);

    // The plaintext listener keeps serving alongside the TLS one.
    let mut plain = TcpStream::connect(proxy.addr()).await.unwrap();
    assert_eq!(common::round_trip(&mut plain, b"plain").await, b"plain");

    drop(tls);
    drop(plain);
    proxy.stop().await;
}

#[tokio::test]
async fn failed_handshake_never_reaches_a_backend() {
    let backend = common::start_echo_backend().await;
    let dir = tempfile::tempdir().unwrap();
    let cert = generate();
    let config = tls_config(common::proxy_config(&[backend]), dir.path(), &cert.cert_pem, &cert.key_pem);
    let proxy = common::start_proxy(config).await;

    let mut raw = TcpStream::connect(proxy.tls_addr.unwrap()).await.unwrap();
    raw.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
    let mut sink = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(5), raw.read_to_end(&mut sink)).await;

    let stats = proxy.tls_stats.clone().unwrap();
    assert!(common::wait_until(Duration::from_secs(5), || stats.handshakes_failed.load(Ordering::Relaxed) == 1).await);
    assert_eq!(proxy.registry.snapshot()[0].active_connections, 0);

    // A client that does not trust the certificate fails too; the listener survives.
    let other = generate();
    let tcp = TcpStream::connect(proxy.tls_addr.unwrap()).await.unwrap();
    let name = ServerName::try_from("localhost").unwrap();
    assert!(connector(&other.der).connect(name, tcp).await.is_err());

    let tcp = TcpStream::connect(proxy.tls_addr.unwrap()).await.unwrap();
    let name = ServerName::try_from("localhost").unwrap();
    let mut tls = connector(&cert.der).connect(name, tcp).await.unwrap();
    tls.write_all(b"x").await.unwrap();
    let mut buf = [0u8; 1];
    tls.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"x");

    drop(tls);
    proxy.stop().await;
}

#[tokio::test]
async fn mismatched_key_prevents_startup() {
    let backend = common::start_echo_backend().await;
    let dir = tempfile::tempdir().unwrap();
    let cert = generate();
    let other = generate();
    let config = tls_config(common::proxy_config(&[backend]), dir.path(), &cert.cert_pem, &other.key_pem);

    let err = ProxyServer::bind(config).await.err().unwrap();
    assert!(matches!(err, StartupError::Tls(TlsError::CertificateLoad { .. })), "{}", err);
}

#[tokio::test]
async fn missing_certificate_prevents_startup() {
    let backend = common::start_echo_backend().await;
    let mut config = common::proxy_config(&[backend]);
    config.listener.tls_address = Some("127.0.0.1:0".into());
    config.tls = Some(TlsConfig {
        cert_path: "/nonexistent/server.crt".into(),
        key_path: "/nonexistent/server.key".into(),
        handshake_timeout_secs: 2,
    });

    let err = ProxyServer::bind(config).await.err().unwrap();
    assert!(matches!(err, StartupError::Tls(TlsError::CertificateLoad { .. })), "{}", err);
}
