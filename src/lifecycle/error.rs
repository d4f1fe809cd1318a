//! Supervisor error kinds.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::health::ProbeError;
use crate::net::{ListenerError, ListenerId};

/// Terminal error of [`Supervisor::run`](super::Supervisor::run).
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// One or more listeners could not acquire their socket.
    #[error("{} listener(s) failed to bind: {}", .0.len(), join(.0))]
    Bind(Vec<ListenerError>),

    /// Health checks did not all pass within the readiness timeout.
    #[error("readiness checks did not pass within {timeout:?}: {}", join(.failing))]
    ReadinessTimeout {
        timeout: Duration,
        failing: Vec<CheckFailure>,
    },

    /// A serving listener terminated on its own.
    #[error("{listener} terminated unexpectedly: {cause}")]
    RuntimeFault { listener: ListenerId, cause: RuntimeCause },

    #[error("supervisor was already run")]
    AlreadyRunning,
}

impl SupervisorError {
    pub fn kind(&self) -> &'static str {
        match self {
            SupervisorError::Bind(_) => "bind_failure",
            SupervisorError::ReadinessTimeout { .. } => "readiness_timeout",
            SupervisorError::RuntimeFault { .. } => "runtime_fault",
            SupervisorError::AlreadyRunning => "already_running",
        }
    }
}

/// A health check that was not healthy when the readiness timeout elapsed.
#[derive(Debug)]
pub struct CheckFailure {
    pub check: String,
    /// Error from the last completed probe; `None` when no probe completed.
    pub last_error: Option<ProbeError>,
}

impl fmt::Display for CheckFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.last_error {
            Some(e) => write!(f, "{} ({})", self.check, e),
            None => write!(f, "{} (no probe completed)", self.check),
        }
    }
}

/// Why a listener stopped serving without being asked to.
#[derive(Debug)]
pub enum RuntimeCause {
    Error(ListenerError),
    /// `start` returned `Ok` although no stop was requested.
    ExitedCleanly,
    Panicked(String),
}

impl fmt::Display for RuntimeCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeCause::Error(e) => write!(f, "{e}"),
            RuntimeCause::ExitedCleanly => f.write_str("listener returned without a stop request"),
            RuntimeCause::Panicked(message) => write!(f, "listener panicked: {message}"),
        }
    }
}

/// A listener that did not release its resources cleanly while stopping.
#[derive(Debug, Error)]
pub enum ShutdownFault {
    #[error("{listener} reported an error while stopping: {error}")]
    Release { listener: ListenerId, error: ListenerError },

    #[error("{listener} did not stop within {grace:?}")]
    Unresponsive { listener: ListenerId, grace: Duration },

    #[error("{listener} panicked: {message}")]
    Panicked { listener: ListenerId, message: String },
}

/// Outcome of a requested drain.
#[derive(Debug, Default)]
pub struct DrainReport {
    pub faults: Vec<ShutdownFault>,
}

impl DrainReport {
    pub fn is_clean(&self) -> bool {
        self.faults.is_empty()
    }
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}
