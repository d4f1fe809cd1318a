//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Readiness gate (lifecycle::supervisor):
//!     Polling round
//!     → active.rs probes every listener concurrently
//!     → dialer.rs opens a fresh connection per probe
//!     → reply judged by ReplyPolicy
//!     → success/failure reported back to the round
//! ```
//!
//! # Design Decisions
//! - Probes are stateless; each one dials its own connection
//! - Every attempt has its own short timeout
//! - "Connection refused" is a negative readiness signal, not an error
//! - Checks only gate startup; there is no liveness polling once ready

pub mod active;
pub mod dialer;

pub use active::{HealthCheck, ProbeError, ProbeSettings, ReplyPolicy};
pub use dialer::{Dialer, Exchange, TokioDialer};
