//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, ports valid, sizes sane)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::config::schema::ServerConfig;
use crate::protocol::message;

const MIN_UDP_SIZE: usize = 512;
const MAX_UDP_SIZE: usize = 65_535;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("address `{0}` is not an IP address")]
    InvalidAddress(String),

    #[error("port must be non-zero")]
    ZeroPort,

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("health.attempt_timeout_ms ({attempt_ms}) must be shorter than timeout_ms ({timeout_ms})")]
    AttemptExceedsReadiness { attempt_ms: u64, timeout_ms: u64 },

    #[error("listeners.udp_size must be within 512..=65535, got {0}")]
    UdpSize(usize),

    #[error("listeners.max_connections must be greater than zero")]
    ZeroConnections,

    #[error("health.query_name is invalid: {0}")]
    QueryName(String),

    #[error("observability.log_level `{0}` is not a valid filter")]
    LogLevel(String),

    #[error("observability.metrics_address `{0}` is not a socket address")]
    MetricsAddress(String),
}

/// Check every semantic constraint, collecting all violations.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.bind_address().is_err() {
        errors.push(ValidationError::InvalidAddress(config.address.clone()));
    }
    if config.port == 0 {
        errors.push(ValidationError::ZeroPort);
    }

    for (name, value) in [
        ("timeout_ms", config.timeout_ms),
        ("health.poll_interval_ms", config.health.poll_interval_ms),
        ("health.attempt_timeout_ms", config.health.attempt_timeout_ms),
        ("listeners.tcp_idle_timeout_ms", config.listeners.tcp_idle_timeout_ms),
        ("shutdown.drain_grace_ms", config.shutdown.drain_grace_ms),
    ] {
        if value == 0 {
            errors.push(ValidationError::ZeroDuration(name));
        }
    }

    if config.health.attempt_timeout_ms >= config.timeout_ms && config.timeout_ms > 0 {
        errors.push(ValidationError::AttemptExceedsReadiness {
            attempt_ms: config.health.attempt_timeout_ms,
            timeout_ms: config.timeout_ms,
        });
    }

    if !(MIN_UDP_SIZE..=MAX_UDP_SIZE).contains(&config.listeners.udp_size) {
        errors.push(ValidationError::UdpSize(config.listeners.udp_size));
    }
    if config.listeners.max_connections == 0 {
        errors.push(ValidationError::ZeroConnections);
    }

    if config.health.query_name.is_empty() {
        errors.push(ValidationError::QueryName("must not be empty".to_string()));
    } else if let Err(e) = message::validate_name(&config.health.query_name) {
        errors.push(ValidationError::QueryName(e.to_string()));
    }

    if EnvFilter::try_new(&config.observability.log_level).is_err() {
        errors.push(ValidationError::LogLevel(config.observability.log_level.clone()));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
