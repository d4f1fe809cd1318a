//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::io;
use std::net::{SocketAddr, TcpListener, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::{watch, Notify};

use dns_server::health::{Dialer, Exchange, TokioDialer};
use dns_server::net::{BoundNotifier, Listener, ListenerError, ListenerId, Transport};
use dns_server::protocol::message;

/// A loopback address whose port is currently free for both TCP and UDP.
pub fn free_addr() -> SocketAddr {
    loop {
        let tcp = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = tcp.local_addr().unwrap();
        if UdpSocket::bind(addr).is_ok() {
            return addr;
        }
    }
}

/// A request handler that never answers.
pub fn silent_handler() -> Arc<dyn dns_server::protocol::RequestHandler> {
    Arc::new(|_: &[u8], _: Transport| -> Option<Vec<u8>> { None })
}

/// How a [`FakeListener`] behaves once started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    /// Bind, then serve until stopped or a fault is injected.
    Serve,
    /// Fail immediately with an address-in-use bind error.
    FailBind,
    /// Bind, then ignore stop requests forever.
    IgnoreStop,
    /// Bind, then panic.
    Panic,
    /// Bind, then return `Ok` without being asked to stop.
    ReturnEarly,
}

/// Listener double that records how the supervisor drives it.
pub struct FakeListener {
    id: ListenerId,
    behaviour: Behaviour,
    stop_tx: watch::Sender<bool>,
    fault: Notify,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl FakeListener {
    pub fn new(transport: Transport, address: SocketAddr, behaviour: Behaviour) -> Arc<Self> {
        let (stop_tx, _) = watch::channel(false);
        Arc::new(Self {
            id: ListenerId::new(transport, address),
            behaviour,
            stop_tx,
            fault: Notify::new(),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        })
    }

    /// Make a serving listener fail as if its socket was closed under it.
    pub fn inject_fault(&self) {
        self.fault.notify_one();
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl Listener for FakeListener {
    fn id(&self) -> ListenerId {
        self.id
    }

    fn start(&self, bound: BoundNotifier) -> BoxFuture<'_, Result<(), ListenerError>> {
        Box::pin(async move {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if self.behaviour == Behaviour::FailBind {
                return Err(ListenerError::Bind {
                    listener: self.id,
                    source: io::Error::from(io::ErrorKind::AddrInUse),
                });
            }
            let _ = bound.send(self.id.address);

            match self.behaviour {
                Behaviour::Serve => {
                    let mut stop = self.stop_tx.subscribe();
                    tokio::select! {
                        _ = stop.wait_for(|stopped| *stopped) => Ok(()),
                        _ = self.fault.notified() => Err(ListenerError::Serve {
                            listener: self.id,
                            source: io::Error::from(io::ErrorKind::BrokenPipe),
                        }),
                    }
                }
                Behaviour::IgnoreStop => std::future::pending().await,
                Behaviour::Panic => panic!("fake listener blew up"),
                Behaviour::ReturnEarly | Behaviour::FailBind => Ok(()),
            }
        })
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.stop_tx.send_replace(true);
    }
}

/// Dialer whose endpoints answer every query, or refuse, on demand.
pub struct ScriptedDialer {
    healthy: AtomicBool,
    dials: AtomicUsize,
}

impl ScriptedDialer {
    pub fn new(healthy: bool) -> Arc<Self> {
        Arc::new(Self {
            healthy: AtomicBool::new(healthy),
            dials: AtomicUsize::new(0),
        })
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

struct EchoExchange;

impl Exchange for EchoExchange {
    fn exchange<'a>(&'a mut self, query: &'a [u8]) -> BoxFuture<'a, io::Result<Vec<u8>>> {
        Box::pin(async move {
            message::build_reply(query).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
        })
    }
}

impl Dialer for ScriptedDialer {
    fn dial(&self, _: Transport, _: SocketAddr) -> BoxFuture<'_, io::Result<Box<dyn Exchange>>> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let healthy = self.healthy.load(Ordering::SeqCst);
        Box::pin(async move {
            if healthy {
                Ok(Box::new(EchoExchange) as Box<dyn Exchange>)
            } else {
                Err(io::Error::from(io::ErrorKind::ConnectionRefused))
            }
        })
    }
}

/// Real sockets, with every dial counted.
#[derive(Default)]
pub struct CountingDialer {
    inner: TokioDialer,
    dials: AtomicUsize,
}

impl CountingDialer {
    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

impl Dialer for CountingDialer {
    fn dial(&self, transport: Transport, target: SocketAddr) -> BoxFuture<'_, io::Result<Box<dyn Exchange>>> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        self.inner.dial(transport, target)
    }
}
