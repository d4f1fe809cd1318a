//! Startup wiring.
//!
//! # Responsibilities
//! - Build one stream and one datagram listener on the configured address
//! - Build the matching health checks from the probe settings
//! - Hand both to a supervisor configured from the same file
//!
//! # Design Decisions
//! - Listeners and checks target the configured address, not the bound one
//! - Nothing is bound here; binding happens when the supervisor runs

use std::sync::Arc;

use crate::config::{ServerConfig, ValidationError};
use crate::health::HealthCheck;
use crate::lifecycle::Supervisor;
use crate::net::{DnsListener, Listener};
use crate::protocol::RequestHandler;

/// Assemble the TCP and UDP listeners, their checks, and a supervisor.
pub fn build_supervisor(config: &ServerConfig, handler: Arc<dyn RequestHandler>) -> Result<Supervisor, ValidationError> {
    let address = config
        .bind_address()
        .map_err(|_| ValidationError::InvalidAddress(config.address.clone()))?;
    let options = config.listener_options();
    let settings = config.probe_settings();

    let listeners: Vec<Arc<dyn Listener>> = vec![
        Arc::new(DnsListener::stream(address, options.clone(), Arc::clone(&handler))),
        Arc::new(DnsListener::datagram(address, options, handler)),
    ];
    let checks = vec![
        HealthCheck::datagram(address, settings.clone()),
        HealthCheck::stream(address, settings),
    ];

    tracing::debug!(address = %address, "Supervisor assembled");
    Ok(Supervisor::new(listeners, checks, config.supervisor_config()))
}
