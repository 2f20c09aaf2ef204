//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! plain / tls listener (listener.rs)
//!     → wait for a slot in the shared connection limit
//!     → accept, set TCP_NODELAY
//!     → register with the ConnectionTracker (connection.rs)
//!     → per-connection task: TLS handshake (tls.rs) on the tls listener
//!     → proxy session
//! ```
//!
//! # Design Decisions
//! - Both listeners draw from one semaphore, so `max_connections` is process-wide
//! - A handshake never runs on the accept loop; a slow client only holds its own task
//! - Certificate problems surface at startup, handshake problems per connection

pub mod connection;
pub mod listener;
pub mod tls;
