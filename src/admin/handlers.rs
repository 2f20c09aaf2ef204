use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::sync::atomic::Ordering;

use crate::admin::AdminState;
use crate::load_balancer::backend::{BackendId, BackendSnapshot, HealthState};
use crate::load_balancer::registry::RegistryError;

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub active_sessions: u64,
    pub backends_total: usize,
    pub backends_healthy: usize,
    pub tls_handshakes_completed: Option<u64>,
    pub tls_handshakes_failed: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct StateChange {
    pub id: BackendId,
    pub previous: HealthState,
    pub current: HealthState,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let backends = state.registry.snapshot();
    let tls = state.tls_stats.as_deref();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started.elapsed().as_secs(),
        active_sessions: state.tracker.active_count(),
        backends_total: backends.len(),
        backends_healthy: backends
            .iter()
            .filter(|b| b.health == HealthState::Healthy)
            .count(),
        tls_handshakes_completed: tls.map(|s| s.handshakes_completed.load(Ordering::Relaxed)),
        tls_handshakes_failed: tls.map(|s| s.handshakes_failed.load(Ordering::Relaxed)),
    })
}

pub async fn get_backends(State(state): State<AdminState>) -> Json<Vec<BackendSnapshot>> {
    Json(state.registry.snapshot())
}

pub async fn drain_backend(
    State(state): State<AdminState>,
    Path(id): Path<usize>,
) -> Result<Json<StateChange>, StatusCode> {
    change_state(&state, id, HealthState::Draining)
}

pub async fn enable_backend(
    State(state): State<AdminState>,
    Path(id): Path<usize>,
) -> Result<Json<StateChange>, StatusCode> {
    change_state(&state, id, HealthState::Healthy)
}

fn change_state(
    state: &AdminState,
    id: usize,
    target: HealthState,
) -> Result<Json<StateChange>, StatusCode> {
    let id = BackendId(id);
    let previous = state.registry.set_health(id, target).map_err(status_for)?;
    Ok(Json(StateChange {
        id,
        previous,
        current: target,
    }))
}

fn status_for(err: RegistryError) -> StatusCode {
    match err {
        RegistryError::UnknownBackend(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
