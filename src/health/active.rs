//! Active health checking.
//!
//! # Responsibilities
//! - Probe one listener with a minimal query
//! - Bound every attempt by a short timeout
//! - Classify the outcome without touching service state

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time;

use crate::health::dialer::{Dialer, TokioDialer};
use crate::net::Transport;
use crate::observability::metrics;
use crate::protocol::message::{self, MessageError, QTYPE_A};

/// How a received reply is judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyPolicy {
    /// The reply must be a DNS response carrying the probe's ID and NOERROR.
    #[default]
    Strict,
    /// Any received bytes count as healthy.
    AnyReply,
}

/// Why a probe did not succeed.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Nothing is listening yet (refused, reset, unreachable).
    #[error("target unreachable: {0}")]
    Unreachable(#[source] io::Error),

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("probe I/O failed: {0}")]
    Io(#[source] io::Error),

    #[error("could not encode probe query: {0}")]
    Query(#[source] MessageError),

    #[error("malformed reply: {0}")]
    Malformed(#[source] MessageError),

    #[error("reply ID {actual:#06x} does not match query ID {expected:#06x}")]
    IdMismatch { expected: u16, actual: u16 },

    #[error("reply carried response code {0}")]
    ResponseCode(u8),
}

impl ProbeError {
    /// Failures that are normal while a listener is still coming up.
    pub fn is_expected(&self) -> bool {
        matches!(self, ProbeError::Unreachable(_) | ProbeError::Timeout(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProbeError::Unreachable(_) => "unreachable",
            ProbeError::Timeout(_) => "timeout",
            ProbeError::Io(_) => "io",
            ProbeError::Query(_) => "query",
            ProbeError::Malformed(_) => "malformed",
            ProbeError::IdMismatch { .. } => "id_mismatch",
            ProbeError::ResponseCode(_) => "rcode",
        }
    }

    fn from_io(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::UnexpectedEof => ProbeError::Unreachable(e),
            _ => ProbeError::Io(e),
        }
    }
}

/// Probe behaviour shared by every check of a supervisor.
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    /// Upper bound for a single probe, dial included.
    pub attempt_timeout: Duration,
    pub reply_policy: ReplyPolicy,
    /// Stream probes send a query when true, otherwise they only connect.
    pub stream_exchange: bool,
    pub query_name: String,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_millis(250),
            reply_policy: ReplyPolicy::Strict,
            stream_exchange: true,
            query_name: "healthcheck.dns-server.".to_string(),
        }
    }
}

/// A self-probe against one listener.
///
/// Every call to [`probe`](Self::probe) dials a fresh connection; nothing
/// carries over between calls.
#[derive(Clone)]
pub struct HealthCheck {
    name: String,
    transport: Transport,
    target: SocketAddr,
    dialer: Arc<dyn Dialer>,
    settings: ProbeSettings,
}

impl HealthCheck {
    pub fn new(transport: Transport, target: SocketAddr, dialer: Arc<dyn Dialer>, settings: ProbeSettings) -> Self {
        Self {
            name: format!("{transport}://{target}"),
            transport,
            target,
            dialer,
            settings,
        }
    }

    pub fn stream(target: SocketAddr, settings: ProbeSettings) -> Self {
        Self::new(Transport::Stream, target, Arc::new(TokioDialer), settings)
    }

    pub fn datagram(target: SocketAddr, settings: ProbeSettings) -> Self {
        Self::new(Transport::Datagram, target, Arc::new(TokioDialer), settings)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Run a single probe.
    pub async fn probe(&self) -> Result<(), ProbeError> {
        let started = Instant::now();
        let timeout = self.settings.attempt_timeout;

        let result = match time::timeout(timeout, self.attempt()).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(timeout)),
        };

        let outcome = match &result {
            Ok(()) => "success",
            Err(e) => e.label(),
        };
        metrics::record_probe(self.transport, outcome, started.elapsed());

        match &result {
            Ok(()) => tracing::debug!(check = %self.name, "Health check passed"),
            Err(e) if e.is_expected() => tracing::debug!(check = %self.name, error = %e, "Health check not ready"),
            Err(e) => tracing::warn!(check = %self.name, error = %e, "Health check failed"),
        }
        result
    }

    async fn attempt(&self) -> Result<(), ProbeError> {
        let mut conn = self
            .dialer
            .dial(self.transport, self.target)
            .await
            .map_err(ProbeError::from_io)?;

        if self.transport == Transport::Stream && !self.settings.stream_exchange {
            return Ok(());
        }

        let id: u16 = rand::random();
        let query = message::build_query(id, &self.settings.query_name, QTYPE_A).map_err(ProbeError::Query)?;
        let reply = conn.exchange(&query).await.map_err(ProbeError::from_io)?;
        self.judge(id, &reply)
    }

    fn judge(&self, id: u16, reply: &[u8]) -> Result<(), ProbeError> {
        if self.settings.reply_policy == ReplyPolicy::AnyReply {
            return Ok(());
        }

        let header = message::parse_reply(reply).map_err(ProbeError::Malformed)?;
        if header.id != id {
            return Err(ProbeError::IdMismatch {
                expected: id,
                actual: header.id,
            });
        }
        if header.rcode() != 0 {
            return Err(ProbeError::ResponseCode(header.rcode()));
        }
        Ok(())
    }
}

impl fmt::Debug for HealthCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthCheck")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
