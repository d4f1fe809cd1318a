//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define service metrics (lifecycle state, listeners, probes, requests)
//! - Expose a Prometheus-compatible scrape endpoint
//!
//! # Metrics
//! - `dns_supervisor_state` (gauge): ordinal of the current lifecycle state
//! - `dns_listener_up` (gauge): 1=serving, 0=not serving, by listener
//! - `dns_health_probe_total` (counter): probes by transport and outcome
//! - `dns_health_probe_duration_seconds` (histogram): probe latency
//! - `dns_requests_total` (counter): requests received by transport
//! - `dns_active_connections` (gauge): open stream connections, by listener
//!
//! Recording is a no-op until a recorder is installed, so library users and
//! tests pay nothing unless they call [`init_metrics`].

use std::net::SocketAddr;
use std::time::Duration;

use ::metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};

use crate::lifecycle::SupervisorState;
use crate::net::{ListenerId, Transport};

const PROBE_DURATION: &str = "dns_health_probe_duration_seconds";

/// Probe latencies: sub-millisecond loopback up to the attempt timeout.
const PROBE_BUCKETS: &[f64] = &[0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0];

/// Install the Prometheus recorder and its HTTP scrape listener.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(Matcher::Full(PROBE_DURATION.to_string()), PROBE_BUCKETS)?
        .install()?;

    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_state(state: SupervisorState) {
    gauge!("dns_supervisor_state").set(state.ordinal() as f64);
}

pub fn record_listener_up(listener: &ListenerId, up: bool) {
    gauge!(
        "dns_listener_up",
        "transport" => listener.transport.as_str(),
        "address" => listener.address.to_string()
    )
    .set(if up { 1.0 } else { 0.0 });
}

pub fn record_probe(transport: Transport, outcome: &'static str, elapsed: Duration) {
    counter!("dns_health_probe_total", "transport" => transport.as_str(), "outcome" => outcome).increment(1);
    histogram!(PROBE_DURATION, "transport" => transport.as_str()).record(elapsed.as_secs_f64());
}

pub fn record_request(transport: Transport) {
    counter!("dns_requests_total", "transport" => transport.as_str()).increment(1);
}

pub fn set_active_connections(listener: &ListenerId, active: u64) {
    gauge!("dns_active_connections", "address" => listener.address.to_string()).set(active as f64);
}
