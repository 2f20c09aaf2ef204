//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Sessions, health monitor, registry, TLS layer
//!     → logging.rs: tracing subscriber (pretty or JSON, EnvFilter)
//!     → metrics.rs: `metrics` facade → Prometheus exporter
//! ```
//!
//! # Design Decisions
//! - Every connection task runs inside a `connection` span carrying its id,
//!   peer and listener, so session logs need no extra correlation fields
//! - One summary log line per finished session
//! - The exporter is optional; recording without it costs nothing

pub mod logging;
pub mod metrics;
