//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (monitor.rs):
//!     Periodic timer
//!     → Probe each backend concurrently (probe.rs)
//!     → Backend::record_probe updates state
//!
//! Fast-fail (proxy::session):
//!     Upstream connect failure
//!     → Registry::set_health(Unhealthy) immediately
//!
//! State machine:
//!     Healthy → Unhealthy: consecutive failures >= unhealthy_threshold
//!     Unhealthy → Healthy: one successful probe
//!     Draining: set by the admin API, never changed by probes
//! ```
//!
//! # Design Decisions
//! - Health state is per-backend, not per-pool
//! - Probe failures are logged, never fatal

pub mod monitor;
pub mod probe;

pub use monitor::HealthMonitor;
