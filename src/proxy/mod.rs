//! Connection proxy subsystem.
//!
//! # Data Flow
//! ```text
//! server.rs (accept loops, TLS handshake, shutdown sequencing)
//!     → session.rs (select backend, connect, reject or relay)
//!     → relay.rs (bidirectional copy with idle timeout)
//! ```
//!
//! # Design Decisions
//! - Layer 4: bytes are relayed without parsing; the only HTTP the proxy
//!   writes is a canned error reply when `protocol = "http"`
//! - One task per connection; the backend's load guard lives in that task

pub mod relay;
pub mod server;
pub mod session;

pub use server::ProxyServer;
