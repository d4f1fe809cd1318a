//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     ServerConfig → listeners + health checks → Supervisor
//!
//! Supervision (supervisor.rs):
//!     Starting (bind all) → Probing (poll checks) → Ready → Draining → Stopped
//!     any failure on the way → unwind every listener → Failed
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger → Supervisor drains
//! ```
//!
//! # Design Decisions
//! - The supervisor task is the only writer of lifecycle state
//! - A failed group never keeps a socket bound
//! - Draining is bounded by a grace period; stuck listeners are reported, not awaited

pub mod error;
pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod supervisor;

pub use error::{CheckFailure, DrainReport, RuntimeCause, ShutdownFault, SupervisorError};
pub use shutdown::Shutdown;
pub use startup::build_supervisor;
pub use supervisor::{Supervisor, SupervisorConfig, SupervisorState};
