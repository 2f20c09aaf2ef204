//! Health probes.
//!
//! # Design Decisions
//! - Every probe is bounded by the configured timeout
//! - TCP probes only establish a connection and close it
//! - HTTP probes issue a GET and accept any 2xx or 3xx status

use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time;

use crate::config::{HealthCheckConfig, ProbeKind};

/// Why a probe failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeFailure {
    #[error("timeout")]
    Timeout,
    #[error("connection error: {0}")]
    Connect(String),
    #[error("non-success status {0}")]
    Status(u16),
}

/// Issues probes against `host:port` endpoints.
#[derive(Clone)]
pub struct Prober {
    kind: ProbeKind,
    path: String,
    timeout: Duration,
    client: Client<HttpConnector, Body>,
}

impl Prober {
    pub fn new(config: &HealthCheckConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(config.timeout()));
        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(0)
            .build(connector);

        Self {
            kind: config.kind,
            path: config.path.clone(),
            timeout: config.timeout(),
            client,
        }
    }

    pub async fn probe(&self, host: &str, port: u16) -> Result<(), ProbeFailure> {
        match time::timeout(self.timeout, self.probe_inner(host, port)).await {
            Ok(result) => result,
            Err(_) => Err(ProbeFailure::Timeout),
        }
    }

    async fn probe_inner(&self, host: &str, port: u16) -> Result<(), ProbeFailure> {
        match self.kind {
            ProbeKind::Tcp => TcpStream::connect((host, port))
                .await
                .map(drop)
                .map_err(|e| ProbeFailure::Connect(e.to_string())),
            ProbeKind::Http => self.http_probe(host, port).await,
        }
    }

    async fn http_probe(&self, host: &str, port: u16) -> Result<(), ProbeFailure> {
        let request = Request::builder()
            .method("GET")
            .uri(format!("http://{}:{}{}", host, port, self.path))
            .header("user-agent", "edge-balancer-health-check")
            .header("connection", "close")
            .body(Body::empty())
            .map_err(|e| ProbeFailure::Connect(e.to_string()))?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| ProbeFailure::Connect(e.to_string()))?;

        let status = response.status();
        if status.is_success() || status.is_redirection() {
            Ok(())
        } else {
            Err(ProbeFailure::Status(status.as_u16()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn config(kind: ProbeKind) -> HealthCheckConfig {
        HealthCheckConfig {
            kind,
            path: "/healthz".into(),
            timeout_secs: 1,
            ..HealthCheckConfig::default()
        }
    }

    async fn http_server(status_line: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let response = format!(
                        "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                        status_line
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });
        port
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn tcp_probe() {
        let prober = Prober::new(&config(ProbeKind::Tcp));
        let open = http_server("200 OK").await;
        assert_eq!(prober.probe("127.0.0.1", open).await, Ok(()));

        let closed = closed_port().await;
        assert!(matches!(
            prober.probe("127.0.0.1", closed).await,
            Err(ProbeFailure::Connect(_))
        ));
    }

    #[tokio::test]
    async fn http_probe_checks_status() {
        let prober = Prober::new(&config(ProbeKind::Http));
        let ok = http_server("204 No Content").await;
        assert_eq!(prober.probe("127.0.0.1", ok).await, Ok(()));

        let failing = http_server("503 Service Unavailable").await;
        assert_eq!(
            prober.probe("127.0.0.1", failing).await,
            Err(ProbeFailure::Status(503))
        );
        assert_eq!(ProbeFailure::Status(503).to_string(), "non-success status 503");
    }

    #[tokio::test]
    async fn silent_backend_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // Accept and never answer.
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let prober = Prober::new(&config(ProbeKind::Http));
        assert_eq!(
            prober.probe("127.0.0.1", port).await,
            Err(ProbeFailure::Timeout)
        );
    }
}
