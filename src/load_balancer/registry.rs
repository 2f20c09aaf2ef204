//! Backend registry.
//!
//! # Responsibilities
//! - Own every backend for the process lifetime
//! - Reject duplicate (host, port) registrations
//! - Expose atomic load and health mutations by id
//! - Hand out immutable snapshots for selection and inspection

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::load_balancer::backend::{
    Backend, BackendId, BackendSnapshot, HealthState, HealthTransition, LoadGuard,
};
use crate::observability::metrics;

/// Errors raised by registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("backend {host}:{port} is already registered")]
    DuplicateBackend { host: String, port: u16 },
    #[error("unknown backend id {0}")]
    UnknownBackend(BackendId),
    #[error("active connection count of {backend} would drop below zero")]
    InvariantViolation { backend: String },
}

/// Ordered set of backends, populated at startup and shared via `Arc`.
#[derive(Debug, Default)]
pub struct Registry {
    backends: Vec<Arc<Backend>>,
    index: HashMap<(String, u16), BackendId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a backend in the Healthy state with zero connections.
    pub fn register(&mut self, host: &str, port: u16) -> Result<BackendId, RegistryError> {
        let key = (host.to_string(), port);
        if self.index.contains_key(&key) {
            return Err(RegistryError::DuplicateBackend {
                host: host.to_string(),
                port,
            });
        }

        let id = BackendId(self.backends.len());
        self.backends.push(Arc::new(Backend::new(id, host, port)));
        self.index.insert(key, id);

        tracing::debug!(backend_id = %id, host = %host, port, "Backend registered");
        Ok(id)
    }

    pub fn get(&self, id: BackendId) -> Result<&Arc<Backend>, RegistryError> {
        self.backends
            .get(id.0)
            .ok_or(RegistryError::UnknownBackend(id))
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Update a backend's health state; visible to the next selection.
    ///
    /// Returns the state it replaced.
    pub fn set_health(&self, id: BackendId, state: HealthState) -> Result<HealthState, RegistryError> {
        let backend = self.get(id)?;
        let previous = backend.set_state(state);
        if previous != state {
            tracing::info!(
                backend = %backend.address(),
                from = %previous,
                to = %state,
                "Backend health changed"
            );
            metrics::record_backend_health(&backend.address(), state);
        }
        Ok(previous)
    }

    /// Mark a Healthy backend Unhealthy after a failed connect.
    ///
    /// Returns false when the backend was not Healthy; a Draining backend
    /// stays Draining.
    pub fn mark_unreachable(&self, id: BackendId) -> Result<bool, RegistryError> {
        let backend = self.get(id)?;
        Ok(match backend.mark_unreachable() {
            Some(transition) => {
                log_transition(backend, transition);
                true
            }
            None => false,
        })
    }

    /// Return an Unhealthy backend to rotation. Other states are untouched.
    pub fn restore(&self, id: BackendId) -> Result<bool, RegistryError> {
        let backend = self.get(id)?;
        Ok(match backend.restore() {
            Some(transition) => {
                log_transition(backend, transition);
                true
            }
            None => false,
        })
    }

    pub fn increment_load(&self, id: BackendId) -> Result<usize, RegistryError> {
        Ok(self.get(id)?.inc_connections())
    }

    /// Fails with `InvariantViolation` instead of going below zero.
    pub fn decrement_load(&self, id: BackendId) -> Result<usize, RegistryError> {
        self.get(id)?.dec_connections()
    }

    /// Increment the backend's load and return a guard that releases it on drop.
    pub fn acquire(&self, id: BackendId) -> Result<LoadGuard, RegistryError> {
        let backend = self.get(id)?;
        Ok(LoadGuard::new(Arc::clone(backend)))
    }

    /// Copies of every backend in registration order.
    pub fn snapshot(&self) -> Vec<BackendSnapshot> {
        self.backends.iter().map(|b| b.snapshot()).collect()
    }

    pub(crate) fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }
}

fn log_transition(backend: &Backend, transition: HealthTransition) {
    tracing::info!(
        backend = %backend.address(),
        from = %transition.from,
        to = %transition.to,
        "Backend health changed"
    );
    metrics::record_health_transition(&backend.address(), transition.to);
    metrics::record_backend_health(&backend.address(), transition.to);
}
