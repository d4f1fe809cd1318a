//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured fields (`listener`, `check`, `state`) on every lifecycle event
//! - JSON output for production, pretty output for development
//! - Metrics are cheap (atomic increments) and optional

pub mod logging;
pub mod metrics;
