//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::health::{ProbeSettings, ReplyPolicy};
use crate::lifecycle::SupervisorConfig;
use crate::net::ListenerOptions;

/// Root configuration for the DNS server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host shared by the TCP and UDP listeners.
    pub address: String,

    /// Bind port shared by the TCP and UDP listeners.
    pub port: u16,

    /// Readiness timeout in milliseconds: how long all health checks may
    /// take to first pass together.
    pub timeout_ms: u64,

    /// Health check settings.
    pub health: HealthConfig,

    /// Transport limits.
    pub listeners: ListenersConfig,

    /// Shutdown settings.
    pub shutdown: ShutdownConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 53,
            timeout_ms: 5_000,
            health: HealthConfig::default(),
            listeners: ListenersConfig::default(),
            shutdown: ShutdownConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl ServerConfig {
    /// The socket address both listeners bind.
    pub fn bind_address(&self) -> Result<SocketAddr, AddrParseError> {
        let ip: IpAddr = self.address.parse()?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            readiness_timeout: Duration::from_millis(self.timeout_ms),
            poll_interval: Duration::from_millis(self.health.poll_interval_ms),
            drain_grace: Duration::from_millis(self.shutdown.drain_grace_ms),
        }
    }

    pub fn probe_settings(&self) -> ProbeSettings {
        ProbeSettings {
            attempt_timeout: Duration::from_millis(self.health.attempt_timeout_ms),
            reply_policy: self.health.reply_policy,
            stream_exchange: self.health.stream_exchange,
            query_name: self.health.query_name.clone(),
        }
    }

    pub fn listener_options(&self) -> ListenerOptions {
        ListenerOptions {
            max_datagram_size: self.listeners.udp_size,
            max_connections: self.listeners.max_connections,
            idle_timeout: Duration::from_millis(self.listeners.tcp_idle_timeout_ms),
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Interval between polling rounds in milliseconds.
    pub poll_interval_ms: u64,

    /// Timeout for a single probe in milliseconds.
    pub attempt_timeout_ms: u64,

    /// Whether malformed replies count as healthy.
    pub reply_policy: ReplyPolicy,

    /// Send a query over TCP instead of only connecting.
    pub stream_exchange: bool,

    /// Name asked for by probe queries.
    pub query_name: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        let probe = ProbeSettings::default();
        Self {
            poll_interval_ms: 50,
            attempt_timeout_ms: probe.attempt_timeout.as_millis() as u64,
            reply_policy: probe.reply_policy,
            stream_exchange: probe.stream_exchange,
            query_name: probe.query_name,
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenersConfig {
    /// Maximum UDP message size.
    pub udp_size: usize,

    /// Maximum concurrent TCP connections, and UDP requests in flight
    /// (backpressure).
    pub max_connections: usize,

    /// Idle TCP connection timeout in milliseconds.
    pub tcp_idle_timeout_ms: u64,
}

impl Default for ListenersConfig {
    fn default() -> Self {
        let options = ListenerOptions::default();
        Self {
            udp_size: options.max_datagram_size,
            max_connections: options.max_connections,
            tcp_idle_timeout_ms: options.idle_timeout.as_millis() as u64,
        }
    }
}

/// Shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long to wait for listeners to release their sockets.
    pub drain_grace_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { drain_grace_ms: 5_000 }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log filter (e.g. "info" or "dns_server=debug").
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9153".to_string(),
        }
    }
}
