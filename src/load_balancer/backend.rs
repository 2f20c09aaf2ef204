//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single backend server
//! - Track active connections (for Least Connections LB)
//! - Track health state (Healthy/Unhealthy/Draining) and probe history

use serde::Serialize;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::load_balancer::registry::RegistryError;

/// Health State enum.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy = 0,
    Unhealthy = 1,
    /// Administratively removed from rotation; existing sessions continue.
    Draining = 2,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            0 => HealthState::Healthy,
            1 => HealthState::Unhealthy,
            _ => HealthState::Draining,
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthState::Healthy => "healthy",
            HealthState::Unhealthy => "unhealthy",
            HealthState::Draining => "draining",
        };
        f.write_str(s)
    }
}

/// Stable identifier of a registered backend (its registration index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct BackendId(pub(crate) usize);

impl BackendId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single backend server.
///
/// All mutable fields are atomics so sessions and the health monitor never
/// contend on a shared lock.
#[derive(Debug)]
pub struct Backend {
    id: BackendId,
    host: String,
    port: u16,
    /// Number of currently active sessions.
    active_connections: AtomicUsize,
    /// Current health state.
    state: AtomicU8,
    /// Consecutive failed probes.
    consecutive_failures: AtomicU32,
    /// Unix time of the last probe in milliseconds (0 = never probed).
    last_probe_ms: AtomicU64,
}

impl Backend {
    /// Create a new backend in the Healthy state with no connections.
    pub fn new(id: BackendId, host: impl Into<String>, port: u16) -> Self {
        Self {
            id,
            host: host.into(),
            port,
            active_connections: AtomicUsize::new(0),
            state: AtomicU8::new(HealthState::Healthy as u8),
            consecutive_failures: AtomicU32::new(0),
            last_probe_ms: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> BackendId {
        self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`, as used for connecting and in logs.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Get the current number of active connections.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Acquire)
    }

    /// Increment active connection count.
    pub fn inc_connections(&self) -> usize {
        self.active_connections.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrement active connection count.
    ///
    /// Refuses to go below zero; the count is left untouched in that case.
    pub fn dec_connections(&self) -> Result<usize, RegistryError> {
        self.active_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map(|prev| prev - 1)
            .map_err(|_| RegistryError::InvariantViolation {
                backend: self.address(),
            })
    }

    // --- Health Logic ---

    pub fn state(&self) -> HealthState {
        HealthState::from(self.state.load(Ordering::Acquire))
    }

    /// Store a new state, returning the previous one.
    pub fn set_state(&self, state: HealthState) -> HealthState {
        if state == HealthState::Healthy {
            self.consecutive_failures.store(0, Ordering::Release);
        }
        HealthState::from(self.state.swap(state as u8, Ordering::AcqRel))
    }

    /// Return true if the backend may receive new sessions.
    pub fn is_healthy(&self) -> bool {
        self.state() == HealthState::Healthy
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    pub fn last_probe(&self) -> Option<SystemTime> {
        match self.last_probe_ms.load(Ordering::Acquire) {
            0 => None,
            ms => Some(UNIX_EPOCH + Duration::from_millis(ms)),
        }
    }

    /// Apply one probe result and return the state transition it caused.
    ///
    /// One success restores Healthy; `unhealthy_threshold` consecutive failures
    /// mark the backend Unhealthy. Draining backends keep their state.
    pub fn record_probe(&self, success: bool, unhealthy_threshold: u32) -> Option<HealthTransition> {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(1)
            .max(1);
        self.last_probe_ms.store(now_ms, Ordering::Release);

        if success {
            self.consecutive_failures.store(0, Ordering::Release);
            return self.transition(HealthState::Unhealthy, HealthState::Healthy);
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= unhealthy_threshold {
            self.transition(HealthState::Healthy, HealthState::Unhealthy)
        } else {
            None
        }
    }

    /// Take a Healthy backend out of rotation after a failed connect.
    ///
    /// Unhealthy and Draining backends are left as they are.
    pub fn mark_unreachable(&self) -> Option<HealthTransition> {
        self.transition(HealthState::Healthy, HealthState::Unhealthy)
    }

    /// Put an Unhealthy backend back into rotation without a probe.
    pub fn restore(&self) -> Option<HealthTransition> {
        self.consecutive_failures.store(0, Ordering::Release);
        self.transition(HealthState::Unhealthy, HealthState::Healthy)
    }

    fn transition(&self, from: HealthState, to: HealthState) -> Option<HealthTransition> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| HealthTransition { from, to })
    }

    /// Immutable copy of the current state.
    pub fn snapshot(&self) -> BackendSnapshot {
        BackendSnapshot {
            id: self.id,
            host: self.host.clone(),
            port: self.port,
            active_connections: self.active_connections(),
            health: self.state(),
            consecutive_failures: self.consecutive_failures(),
            last_probe: self.last_probe(),
        }
    }
}

/// A health state change caused by a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthTransition {
    pub from: HealthState,
    pub to: HealthState,
}

/// Point-in-time copy of a backend, safe to hand out and inspect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendSnapshot {
    pub id: BackendId,
    pub host: String,
    pub port: u16,
    pub active_connections: usize,
    pub health: HealthState,
    pub consecutive_failures: u32,
    pub last_probe: Option<SystemTime>,
}

impl BackendSnapshot {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A RAII guard that holds one unit of a backend's active connection count.
///
/// Created by [`crate::load_balancer::registry::Registry::acquire`]; the count
/// is decremented exactly once, when the guard is dropped.
#[derive(Debug)]
pub struct LoadGuard {
    backend: Arc<Backend>,
}

impl LoadGuard {
    pub(crate) fn new(backend: Arc<Backend>) -> Self {
        backend.inc_connections();
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }
}

impl Deref for LoadGuard {
    type Target = Backend;
    fn deref(&self) -> &Self::Target {
        &self.backend
    }
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        if let Err(e) = self.backend.dec_connections() {
            tracing::error!(error = %e, "Connection count invariant violated");
        }
    }
}
