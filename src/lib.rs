//! DNS endpoint supervisor library.
//!
//! Brings up TCP and UDP DNS listeners together, confirms with live
//! self-probes that both answer, and keeps them as one unit until stopped.

pub mod config;
pub mod health;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod protocol;

pub use config::schema::ServerConfig;
pub use lifecycle::{Shutdown, Supervisor, SupervisorError, SupervisorState};
