//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! New client session
//!     → Selector::select()
//!     → registry.rs (snapshot of all backends)
//!     → filter to Healthy
//!     → Apply load balancing algorithm:
//!         - least_conn.rs (fewest active connections, lowest index on ties)
//!         - round_robin.rs (rotate through healthy backends)
//!     → BackendSnapshot of the chosen backend, or NoHealthyBackend
//! ```
//!
//! # Design Decisions
//! - Algorithms are stateless over snapshots; the registry owns all counters
//! - No lock is held across select + increment; two sessions may briefly
//!   pick the same least-loaded backend, which evens out on later calls
//! - Unhealthy and Draining backends are excluded before the algorithm runs

pub mod backend;
pub mod least_conn;
pub mod registry;
pub mod round_robin;

use std::sync::Arc;
use thiserror::Error;

use crate::config::Policy;
use backend::{BackendSnapshot, HealthState};
use least_conn::LeastConnections;
use registry::Registry;
use round_robin::RoundRobin;

/// A backend selection algorithm.
///
/// `candidates` only contains Healthy backends, in registration order.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    fn next_server<'a>(&self, candidates: &'a [BackendSnapshot]) -> Option<&'a BackendSnapshot>;
}

/// Selection failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectError {
    #[error("no healthy backend available")]
    NoHealthyBackend,
}

/// Picks the backend for each new session.
#[derive(Debug)]
pub struct Selector {
    registry: Arc<Registry>,
    algorithm: Box<dyn LoadBalancer>,
}

impl Selector {
    pub fn new(registry: Arc<Registry>, policy: Policy) -> Self {
        let algorithm: Box<dyn LoadBalancer> = match policy {
            Policy::LeastConnections => Box::new(LeastConnections::new()),
            Policy::RoundRobin => Box::new(RoundRobin::new()),
        };
        Self {
            registry,
            algorithm,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Choose a Healthy backend from a fresh registry snapshot.
    pub fn select(&self) -> Result<BackendSnapshot, SelectError> {
        let healthy: Vec<BackendSnapshot> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|b| b.health == HealthState::Healthy)
            .collect();

        match self.algorithm.next_server(&healthy) {
            Some(chosen) => Ok(chosen.clone()),
            None => {
                tracing::debug!(
                    backend_count = self.registry.len(),
                    "No healthy backends found"
                );
                Err(SelectError::NoHealthyBackend)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(entries: &[(usize, HealthState)]) -> Arc<Registry> {
        let mut registry = Registry::new();
        for (i, (load, state)) in entries.iter().enumerate() {
            let id = registry.register("127.0.0.1", 9000 + i as u16).unwrap();
            for _ in 0..*load {
                registry.increment_load(id).unwrap();
            }
            registry.set_health(id, *state).unwrap();
        }
        Arc::new(registry)
    }

    #[test]
    fn picks_least_loaded_healthy() {
        let selector = Selector::new(
            registry(&[
                (2, HealthState::Healthy),
                (1, HealthState::Healthy),
                (0, HealthState::Unhealthy),
            ]),
            Policy::LeastConnections,
        );
        let chosen = selector.select().unwrap();
        assert_eq!(chosen.port, 9001);
    }

    #[test]
    fn all_unhealthy_fails() {
        let selector = Selector::new(
            registry(&[(0, HealthState::Unhealthy), (0, HealthState::Unhealthy)]),
            Policy::LeastConnections,
        );
        assert_eq!(selector.select(), Err(SelectError::NoHealthyBackend));
    }

    #[test]
    fn empty_registry_fails() {
        let selector = Selector::new(Arc::new(Registry::new()), Policy::RoundRobin);
        assert_eq!(selector.select(), Err(SelectError::NoHealthyBackend));
    }

    #[test]
    fn never_returns_excluded_states() {
        // Every combination of three backends over the three states.
        let states = [HealthState::Healthy, HealthState::Unhealthy, HealthState::Draining];
        for policy in [Policy::LeastConnections, Policy::RoundRobin] {
            for a in states {
                for b in states {
                    for c in states {
                        let selector =
                            Selector::new(registry(&[(3, a), (0, b), (1, c)]), policy);
                        for _ in 0..4 {
                            match selector.select() {
                                Ok(chosen) => assert_eq!(chosen.health, HealthState::Healthy),
                                Err(SelectError::NoHealthyBackend) => {
                                    assert!([a, b, c].iter().all(|s| *s != HealthState::Healthy))
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}
