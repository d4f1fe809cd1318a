//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Listener::start
//!     → bind socket (report bound address, or fail fast)
//!     → stream.rs (accept loop, length-prefixed frames, connection limits)
//!       datagram.rs (recv loop, one message per datagram)
//!     → connection.rs (per-connection tracking)
//!     → RequestHandler for every request
//!
//! Listener States:
//!     NotStarted → Serving → Stopped | Failed
//! ```
//!
//! # Design Decisions
//! - Sockets are owned by the serving future and released when it returns
//! - Stop is a watch signal; it is idempotent and may precede start
//! - A listener never restarts itself

pub mod connection;
pub mod datagram;
pub mod listener;
pub mod stream;

pub use listener::{BoundNotifier, DnsListener, Listener, ListenerError, ListenerId, ListenerOptions};

use std::fmt;

/// Transport kind served by a listener or probed by a health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// Connection oriented (TCP).
    Stream,
    /// Connectionless (UDP).
    Datagram,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Stream => "tcp",
            Transport::Datagram => "udp",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
