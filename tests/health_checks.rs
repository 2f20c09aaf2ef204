//! Active health checking against live and failing backends.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use edge_balancer::config::{ProbeKind, ProxyConfig};
use edge_balancer::load_balancer::backend::HealthState;

mod common;

const WAIT: Duration = Duration::from_secs(10);

fn with_health_checks(mut config: ProxyConfig, kind: ProbeKind) -> ProxyConfig {
    config.health_check.enabled = true;
    config.health_check.kind = kind;
    config.health_check.interval_secs = 1;
    config.health_check.timeout_secs = 1;
    config.health_check.unhealthy_threshold = 2;
    config
}

#[tokio::test]
async fn failing_backend_is_evicted_and_recovers() {
    let flaky = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let flaky_addr = flaky.local_addr().unwrap();
    let stable = common::start_echo_backend().await;

    let config = with_health_checks(common::proxy_config(&[flaky_addr, stable]), ProbeKind::Tcp);
    let proxy = common::start_proxy(config).await;
    let registry = proxy.registry.clone();

    drop(flaky);
    assert!(common::wait_until(WAIT, || registry.snapshot()[0].health == HealthState::Unhealthy).await);

    // Evicted backends receive no new sessions.
    let mut client = TcpStream::connect(proxy.addr()).await.unwrap();
    assert_eq!(common::round_trip(&mut client, b"ok").await, b"ok");
    let snapshot = registry.snapshot();
    assert_eq!(snapshot[0].active_connections, 0);
    assert_eq!(snapshot[1].active_connections, 1);
    assert!(snapshot[0].consecutive_failures >= 2);

    let _revived = TcpListener::bind(flaky_addr).await.unwrap();
    assert!(common::wait_until(WAIT, || registry.snapshot()[0].health == HealthState::Healthy).await);
    let snapshot = registry.snapshot();
    assert_eq!(snapshot[0].consecutive_failures, 0);
    assert!(snapshot[0].last_probe.is_some());

    drop(client);
    proxy.stop().await;
}

/// Answer every request with `status`, then close.
async fn start_status_backend(status: &'static str) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!("HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n", status);
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

#[tokio::test]
async fn http_probes_judge_status_codes() {
    let ok = common::start_http_backend("up").await;
    let failing = start_status_backend("500 Internal Server Error").await;

    let config = with_health_checks(common::proxy_config(&[ok, failing]), ProbeKind::Http);
    let proxy = common::start_proxy(config).await;
    let registry = proxy.registry.clone();

    assert!(common::wait_until(WAIT, || registry.snapshot()[1].health == HealthState::Unhealthy).await);
    let snapshot = registry.snapshot();
    assert_eq!(snapshot[0].health, HealthState::Healthy);
    assert!(snapshot[0].last_probe.is_some());
    proxy.stop().await;
}

#[tokio::test]
async fn probes_leave_draining_backends_alone() {
    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = backend.local_addr().unwrap();
    drop(backend);

    let config = with_health_checks(common::proxy_config(&[addr]), ProbeKind::Tcp);
    let proxy = common::start_proxy(config).await;
    let registry = proxy.registry.clone();
    let id = registry.snapshot()[0].id;
    registry.set_health(id, HealthState::Draining).unwrap();

    assert!(common::wait_until(WAIT, || registry.snapshot()[0].consecutive_failures >= 3).await);
    assert_eq!(registry.snapshot()[0].health, HealthState::Draining);
    proxy.stop().await;
}
