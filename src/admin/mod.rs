//! Admin API.
//!
//! # Responsibilities
//! - Report process status and the backend registry as JSON
//! - Drain and re-enable backends at runtime
//! - Require `Authorization: Bearer <api_key>` on every route

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::load_balancer::registry::Registry;
use crate::net::connection::ConnectionTracker;
use crate::net::tls::TlsStats;

/// Shared state for admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub registry: Arc<Registry>,
    pub tracker: ConnectionTracker,
    pub tls_stats: Option<Arc<TlsStats>>,
    pub started: Instant,
    pub api_key: Arc<str>,
}

impl AdminState {
    pub fn new(
        registry: Arc<Registry>,
        tracker: ConnectionTracker,
        tls_stats: Option<Arc<TlsStats>>,
        api_key: &str,
    ) -> Self {
        Self {
            registry,
            tracker,
            tls_stats,
            started: Instant::now(),
            api_key: Arc::from(api_key),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/backends", get(get_backends))
        .route("/admin/backends/{id}/drain", post(drain_backend))
        .route("/admin/backends/{id}/enable", post(enable_backend))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin API on `listener` until `stop` fires.
pub async fn serve(listener: TcpListener, state: AdminState, stop: CancellationToken) -> std::io::Result<()> {
    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(stop.cancelled_owned())
        .await
}
