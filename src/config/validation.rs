//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, ports valid)
//! - Check cross-section requirements (TLS listener needs `[tls]`)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Duplicate backends are left to the registry, which owns that invariant

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::{ProbeKind, ProxyConfig};

/// A single semantic problem found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no backends configured")]
    NoBackends,
    #[error("backend #{index} has an empty host")]
    EmptyBackendHost { index: usize },
    #[error("backend #{index} has port 0")]
    ZeroBackendPort { index: usize },
    #[error("no listener configured (set plain_address and/or tls_address)")]
    NoListener,
    #[error("{field}: invalid socket address {value:?}")]
    InvalidAddress { field: &'static str, value: String },
    #[error("tls_address is set but the [tls] section is missing")]
    TlsSectionMissing,
    #[error("{field} must be greater than zero")]
    MustBePositive { field: &'static str },
    #[error("health_check.timeout_secs must not exceed health_check.interval_secs")]
    ProbeTimeoutExceedsInterval,
    #[error("health_check.path must start with '/'")]
    InvalidProbePath,
    #[error("admin.api_key must be set when the admin API is enabled")]
    MissingAdminKey,
}

/// Validate a parsed configuration, collecting every error found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.backends.is_empty() {
        errors.push(ValidationError::NoBackends);
    }
    for (index, backend) in config.backends.iter().enumerate() {
        if backend.host.trim().is_empty() {
            errors.push(ValidationError::EmptyBackendHost { index });
        }
        if backend.port == 0 {
            errors.push(ValidationError::ZeroBackendPort { index });
        }
    }

    let listener = &config.listener;
    if listener.plain_address.is_none() && listener.tls_address.is_none() {
        errors.push(ValidationError::NoListener);
    }
    if let Some(addr) = &listener.plain_address {
        check_addr(&mut errors, "listener.plain_address", addr);
    }
    if let Some(addr) = &listener.tls_address {
        check_addr(&mut errors, "listener.tls_address", addr);
        match &config.tls {
            None => errors.push(ValidationError::TlsSectionMissing),
            Some(tls) if tls.handshake_timeout_secs == 0 => {
                errors.push(ValidationError::MustBePositive {
                    field: "tls.handshake_timeout_secs",
                })
            }
            Some(_) => {}
        }
    }
    if listener.max_connections == 0 {
        errors.push(ValidationError::MustBePositive {
            field: "listener.max_connections",
        });
    }

    let health = &config.health_check;
    if health.enabled {
        if health.interval_secs == 0 {
            errors.push(ValidationError::MustBePositive {
                field: "health_check.interval_secs",
            });
        }
        if health.timeout_secs == 0 {
            errors.push(ValidationError::MustBePositive {
                field: "health_check.timeout_secs",
            });
        } else if health.timeout_secs > health.interval_secs {
            errors.push(ValidationError::ProbeTimeoutExceedsInterval);
        }
        if health.kind == ProbeKind::Http && !health.path.starts_with('/') {
            errors.push(ValidationError::InvalidProbePath);
        }
    } else if health.failure_cooldown_secs == 0 {
        errors.push(ValidationError::MustBePositive {
            field: "health_check.failure_cooldown_secs",
        });
    }
    if health.unhealthy_threshold == 0 {
        errors.push(ValidationError::MustBePositive {
            field: "health_check.unhealthy_threshold",
        });
    }

    let timeouts = &config.timeouts;
    if timeouts.connect_secs == 0 {
        errors.push(ValidationError::MustBePositive {
            field: "timeouts.connect_secs",
        });
    }
    if timeouts.idle_secs == 0 {
        errors.push(ValidationError::MustBePositive {
            field: "timeouts.idle_secs",
        });
    }

    if config.observability.metrics_enabled {
        check_addr(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if config.admin.enabled {
        check_addr(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::MissingAdminKey);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_addr(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}
