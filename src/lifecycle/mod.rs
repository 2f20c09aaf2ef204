//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Build registry → Load TLS → Bind listeners
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain sessions → Force close → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!     Second SIGTERM/SIGINT → Force close
//! ```
//!
//! # Design Decisions
//! - Nothing is accepted until the registry and TLS material are ready
//! - Open sessions get `timeouts.shutdown_grace_secs` to finish on their own
//!   before the force token closes them

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
