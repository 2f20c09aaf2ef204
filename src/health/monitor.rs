//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every registered backend
//! - Update backend health state based on results

use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::HealthCheckConfig;
use crate::health::probe::Prober;
use crate::load_balancer::backend::{Backend, HealthState};
use crate::load_balancer::registry::Registry;
use crate::observability::metrics;

pub struct HealthMonitor {
    registry: Arc<Registry>,
    config: HealthCheckConfig,
    prober: Prober,
}

impl HealthMonitor {
    pub fn new(registry: Arc<Registry>, config: HealthCheckConfig) -> Self {
        let prober = Prober::new(&config);
        Self {
            registry,
            config,
            prober,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval_secs = self.config.interval_secs,
            timeout_secs = self.config.timeout_secs,
            kind = ?self.config.kind,
            unhealthy_threshold = self.config.unhealthy_threshold,
            "Health monitor starting"
        );

        let mut ticker = time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every backend once, concurrently, and apply the results.
    pub async fn check_all(&self) {
        let mut probes = JoinSet::new();
        for backend in self.registry.backends() {
            let backend = Arc::clone(backend);
            let prober = self.prober.clone();
            let threshold = self.config.unhealthy_threshold;
            probes.spawn(async move { check_one(&prober, &backend, threshold).await });
        }
        while let Some(result) = probes.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Health probe task failed");
            }
        }
    }
}

async fn check_one(prober: &Prober, backend: &Backend, threshold: u32) {
    let addr = backend.address();
    let result = prober.probe(backend.host(), backend.port()).await;

    if let Err(failure) = &result {
        tracing::warn!(
            backend = %addr,
            error = %failure,
            consecutive_failures = backend.consecutive_failures() + 1,
            "Health check failed"
        );
    }

    if backend.state() == HealthState::Draining {
        tracing::debug!(backend = %addr, healthy = result.is_ok(), "Backend draining, state unchanged");
    }

    if let Some(transition) = backend.record_probe(result.is_ok(), threshold) {
        tracing::info!(
            backend = %addr,
            from = %transition.from,
            to = %transition.to,
            "Backend health changed"
        );
        metrics::record_health_transition(&addr, transition.to);
    }

    metrics::record_backend_health(&addr, backend.state());
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn config() -> HealthCheckConfig {
        HealthCheckConfig {
            timeout_secs: 1,
            interval_secs: 1,
            unhealthy_threshold: 3,
            ..HealthCheckConfig::default()
        }
    }

    #[tokio::test]
    async fn three_failures_then_one_success() {
        // Reserve a port, then release it so probes are refused.
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        let mut registry = Registry::new();
        let id = registry.register("127.0.0.1", port).unwrap();
        let registry = Arc::new(registry);
        let monitor = HealthMonitor::new(registry.clone(), config());

        monitor.check_all().await;
        monitor.check_all().await;
        assert_eq!(registry.snapshot()[0].health, HealthState::Healthy);
        monitor.check_all().await;
        assert_eq!(registry.snapshot()[0].health, HealthState::Unhealthy);

        let _listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        monitor.check_all().await;
        let snap = &registry.snapshot()[id.index()];
        assert_eq!(snap.health, HealthState::Healthy);
        assert_eq!(snap.consecutive_failures, 0);
        assert!(snap.last_probe.is_some());
    }

    #[tokio::test]
    async fn stops_on_shutdown() {
        let registry = Arc::new(Registry::new());
        let monitor = HealthMonitor::new(registry, config());
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(monitor.run(shutdown.clone()));
        shutdown.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
