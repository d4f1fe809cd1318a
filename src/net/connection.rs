//! Stream connection tracking.
//!
//! # Responsibilities
//! - Number the connections of one listener for log correlation
//! - Count open connections and publish the gauge
//! - Decrement on every exit path through a drop guard

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::net::ListenerId;
use crate::observability::metrics;

/// Per-listener connection number, starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug)]
struct Counters {
    listener: ListenerId,
    next_id: AtomicU64,
    active: AtomicU64,
}

/// Counts the open connections of one stream listener.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    counters: Arc<Counters>,
}

impl ConnectionTracker {
    pub fn new(listener: ListenerId) -> Self {
        Self {
            counters: Arc::new(Counters {
                listener,
                next_id: AtomicU64::new(1),
                active: AtomicU64::new(0),
            }),
        }
    }

    /// Register an accepted connection; the guard unregisters it on drop.
    pub fn track(&self) -> ConnectionGuard {
        let id = ConnectionId(self.counters.next_id.fetch_add(1, Ordering::Relaxed));
        let active = self.counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_active_connections(&self.counters.listener, active);
        ConnectionGuard {
            counters: Arc::clone(&self.counters),
            id,
        }
    }

    pub fn active_count(&self) -> u64 {
        self.counters.active.load(Ordering::SeqCst)
    }
}

/// Held by a connection task for as long as the connection is open.
#[derive(Debug)]
pub struct ConnectionGuard {
    counters: Arc<Counters>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let active = self.counters.active.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_active_connections(&self.counters.listener, active);
        tracing::trace!(listener = %self.counters.listener, connection_id = %self.id, "Connection closed");
    }
}
