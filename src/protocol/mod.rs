//! Protocol collaborator boundary.
//!
//! # Data Flow
//! ```text
//! Listener receives request bytes
//!     → handler.rs (RequestHandler::handle)
//!     → optional response bytes back to the listener
//!
//! Health checks:
//!     message.rs builds the probe query
//!     → message.rs parses the reply header
//! ```
//!
//! # Design Decisions
//! - Listeners depend on the `RequestHandler` capability only
//! - Message support stops at the header and question section

pub mod handler;
pub mod message;

pub use handler::{EchoHandler, RequestHandler};
