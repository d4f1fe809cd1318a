//! Listener capability and the socket-backed DNS listener.
//!
//! # Responsibilities
//! - Bind the configured address for one transport
//! - Report the bound address before serving
//! - Serve until stopped or the transport fails
//! - Release the socket on every exit path

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::sync::{oneshot, watch};

use crate::net::{datagram, stream, Transport};
use crate::protocol::RequestHandler;

/// Sender half used by a listener to announce its bound address.
///
/// Dropping it without sending tells the caller the listener never bound.
pub type BoundNotifier = oneshot::Sender<SocketAddr>;

/// Identity of a listener: its transport and configured address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId {
    pub transport: Transport,
    pub address: SocketAddr,
}

impl ListenerId {
    pub fn new(transport: Transport, address: SocketAddr) -> Self {
        Self { transport, address }
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.transport, self.address)
    }
}

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to acquire the socket.
    #[error("failed to bind {listener}: {source}")]
    Bind {
        listener: ListenerId,
        #[source]
        source: io::Error,
    },

    /// The transport failed while serving.
    #[error("{listener} stopped serving: {source}")]
    Serve {
        listener: ListenerId,
        #[source]
        source: io::Error,
    },

    /// `start` was called more than once.
    #[error("{0} was already started")]
    AlreadyStarted(ListenerId),
}

impl ListenerError {
    pub fn listener(&self) -> ListenerId {
        match self {
            ListenerError::Bind { listener, .. }
            | ListenerError::Serve { listener, .. }
            | ListenerError::AlreadyStarted(listener) => *listener,
        }
    }

    pub fn is_bind(&self) -> bool {
        matches!(self, ListenerError::Bind { .. })
    }
}

/// A single network endpoint for one transport.
///
/// `start` blocks (asynchronously) for the listener's whole serving life. It
/// sends the bound address through `bound` once the socket is acquired, and
/// returns `Ok(())` only after `stop` was requested.
pub trait Listener: Send + Sync + 'static {
    fn id(&self) -> ListenerId;

    fn start(&self, bound: BoundNotifier) -> BoxFuture<'_, Result<(), ListenerError>>;

    /// Request an orderly halt. Idempotent, and may be called before `start`.
    fn stop(&self);
}

/// Transport-specific limits.
#[derive(Debug, Clone)]
pub struct ListenerOptions {
    /// Largest datagram accepted or sent (datagram transport).
    pub max_datagram_size: usize,
    /// Maximum concurrent connections (stream transport) or requests being
    /// handled (datagram transport).
    pub max_connections: usize,
    /// Close a connection after this long without a complete request.
    pub idle_timeout: Duration,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            max_datagram_size: 65_535,
            max_connections: 1_024,
            idle_timeout: Duration::from_secs(10),
        }
    }
}

/// A bound DNS endpoint serving requests through a [`RequestHandler`].
pub struct DnsListener {
    id: ListenerId,
    options: ListenerOptions,
    handler: Arc<dyn RequestHandler>,
    stop_tx: watch::Sender<bool>,
    started: AtomicBool,
}

impl DnsListener {
    pub fn new(
        transport: Transport,
        address: SocketAddr,
        options: ListenerOptions,
        handler: Arc<dyn RequestHandler>,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            id: ListenerId::new(transport, address),
            options,
            handler,
            stop_tx,
            started: AtomicBool::new(false),
        }
    }

    pub fn stream(address: SocketAddr, options: ListenerOptions, handler: Arc<dyn RequestHandler>) -> Self {
        Self::new(Transport::Stream, address, options, handler)
    }

    pub fn datagram(address: SocketAddr, options: ListenerOptions, handler: Arc<dyn RequestHandler>) -> Self {
        Self::new(Transport::Datagram, address, options, handler)
    }

    pub fn options(&self) -> &ListenerOptions {
        &self.options
    }

    async fn run(&self, bound: BoundNotifier) -> Result<(), ListenerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ListenerError::AlreadyStarted(self.id));
        }

        let stop = self.stop_tx.subscribe();
        if *stop.borrow() {
            tracing::debug!(listener = %self.id, "Stopped before start; not binding");
            return Ok(());
        }

        let handler = Arc::clone(&self.handler);
        match self.id.transport {
            Transport::Stream => stream::serve(self.id, &self.options, handler, bound, stop).await,
            Transport::Datagram => datagram::serve(self.id, &self.options, handler, bound, stop).await,
        }
    }
}

impl Listener for DnsListener {
    fn id(&self) -> ListenerId {
        self.id
    }

    fn start(&self, bound: BoundNotifier) -> BoxFuture<'_, Result<(), ListenerError>> {
        Box::pin(self.run(bound))
    }

    fn stop(&self) {
        if !self.stop_tx.send_replace(true) {
            tracing::debug!(listener = %self.id, "Stop requested");
        }
    }
}

impl fmt::Debug for DnsListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DnsListener")
            .field("id", &self.id)
            .field("options", &self.options)
            .field("started", &self.started.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Resolves once `stop` carries `true`.
pub(crate) async fn stopped(stop: &mut watch::Receiver<bool>) {
    // The sender lives as long as the listener, so an error here means the
    // listener itself is gone; treat that as a stop.
    let _ = stop.wait_for(|stopped| *stopped).await;
}
