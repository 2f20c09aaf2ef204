//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! edge-balancer --config <path>
//!     → loader.rs (read file, toml → ProxyConfig)
//!     → validation.rs (collect every semantic error)
//!     → ProxyServer::bind (registry, TLS, listeners)
//! ```
//!
//! # Design Decisions
//! - Loaded once at startup; there is no hot reload
//! - Every section has defaults so a config can list just backends and a listener
//! - Duplicate backends are caught by the registry, not here

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, BackendConfig, ClientProtocol, HealthCheckConfig, ListenerConfig,
    LoadBalancingConfig, LogFormat, ObservabilityConfig, Policy, ProbeKind, ProxyConfig,
    TimeoutConfig, TlsConfig,
};
