//! Shared utilities for integration testing.
#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use edge_balancer::config::{BackendConfig, ProxyConfig};
use edge_balancer::load_balancer::registry::Registry;
use edge_balancer::net::connection::ConnectionTracker;
use edge_balancer::net::tls::TlsStats;
use edge_balancer::{ProxyServer, Shutdown};

/// Start a backend that echoes every byte back until the client half-closes.
pub async fn start_echo_backend() -> SocketAddr {
    start_backend(|mut socket| async move {
        let (mut reader, mut writer) = socket.split();
        let _ = tokio::io::copy(&mut reader, &mut writer).await;
        let _ = writer.shutdown().await;
    })
    .await
}

/// Start a backend that answers every connection with a fixed HTTP response.
pub async fn start_http_backend(body: &'static str) -> SocketAddr {
    start_http_backend_at("127.0.0.1:0".parse().unwrap(), body).await
}

/// Same as [`start_http_backend`], listening on `addr`.
pub async fn start_http_backend_at(addr: SocketAddr, body: &'static str) -> SocketAddr {
    start_backend_at(addr, move |mut socket| async move {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
            match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        }
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let _ = socket.write_all(response.as_bytes()).await;
        let _ = socket.shutdown().await;
    })
    .await
}

/// Start a backend that reads once and then resets the connection.
pub async fn start_abrupt_backend() -> SocketAddr {
    start_backend(|mut socket| async move {
        let mut buf = [0u8; 64];
        let _ = socket.read(&mut buf).await;
        let _ = socket2::SockRef::from(&socket).set_linger(Some(Duration::ZERO));
        drop(socket);
    })
    .await
}

async fn start_backend<F, Fut>(handler: F) -> SocketAddr
where
    F: Fn(TcpStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    start_backend_at("127.0.0.1:0".parse().unwrap(), handler).await
}

async fn start_backend_at<F, Fut>(addr: SocketAddr, handler: F) -> SocketAddr
where
    F: Fn(TcpStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handler = Arc::new(handler);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    tokio::spawn(handler(socket));
                }
                Err(_) => break,
            }
        }
    });
    addr
}

/// Distinct local addresses nothing listens on.
pub async fn closed_addrs(n: usize) -> Vec<SocketAddr> {
    let mut listeners = Vec::new();
    for _ in 0..n {
        listeners.push(TcpListener::bind("127.0.0.1:0").await.unwrap());
    }
    listeners.iter().map(|l| l.local_addr().unwrap()).collect()
}

/// A proxy config on an ephemeral port with health checks disabled.
pub fn proxy_config(backends: &[SocketAddr]) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.plain_address = Some("127.0.0.1:0".into());
    config.backends = backends
        .iter()
        .map(|addr| BackendConfig::new(addr.ip().to_string(), addr.port()))
        .collect();
    config.health_check.enabled = false;
    config.timeouts.connect_secs = 1;
    config.timeouts.shutdown_grace_secs = 1;
    config
}

/// A running proxy and handles to inspect and stop it.
pub struct TestProxy {
    pub addr: Option<SocketAddr>,
    pub tls_addr: Option<SocketAddr>,
    pub admin_addr: Option<SocketAddr>,
    pub registry: Arc<Registry>,
    pub tracker: ConnectionTracker,
    pub tls_stats: Option<Arc<TlsStats>>,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<()>,
}

impl TestProxy {
    pub fn addr(&self) -> SocketAddr {
        self.addr.unwrap()
    }

    /// Trigger shutdown and wait for `run` to return.
    pub async fn stop(self) {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .unwrap()
            .unwrap();
    }
}

pub async fn start_proxy(config: ProxyConfig) -> TestProxy {
    let server = ProxyServer::bind(config).await.unwrap();
    let shutdown = Shutdown::new();

    let addr = server.plain_addr();
    let tls_addr = server.tls_addr();
    let admin_addr = server.admin_addr();
    let registry = Arc::clone(server.registry());
    let tracker = server.tracker().clone();
    let tls_stats = server.tls_stats();
    let handle = tokio::spawn(server.run(shutdown.clone()));

    TestProxy {
        addr,
        tls_addr,
        admin_addr,
        registry,
        tracker,
        tls_stats,
        shutdown,
        handle,
    }
}

/// Send `msg` and read the same number of bytes back.
pub async fn round_trip(stream: &mut TcpStream, msg: &[u8]) -> Vec<u8> {
    stream.write_all(msg).await.unwrap();
    let mut buf = vec![0u8; msg.len()];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    buf
}

/// Poll `condition` every 20ms until it holds or `limit` elapses.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
