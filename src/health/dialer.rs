//! Connection establishment for health probes.
//!
//! Probes never open sockets directly; they go through a [`Dialer`] so tests
//! can substitute fakes for refused, silent or misbehaving endpoints.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use futures_util::future::BoxFuture;
use tokio::net::{TcpStream, UdpSocket};

use crate::net::stream::{read_frame, write_frame};
use crate::net::Transport;

/// Largest reply a datagram probe will read.
const MAX_REPLY_SIZE: usize = 65_535;

/// One established probe connection.
pub trait Exchange: Send {
    /// Send `query` and wait for a single reply message.
    fn exchange<'a>(&'a mut self, query: &'a [u8]) -> BoxFuture<'a, io::Result<Vec<u8>>>;
}

/// Opens probe connections.
pub trait Dialer: Send + Sync + 'static {
    fn dial(&self, transport: Transport, target: SocketAddr) -> BoxFuture<'_, io::Result<Box<dyn Exchange>>>;
}

/// Dials real sockets through tokio.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioDialer;

impl Dialer for TokioDialer {
    fn dial(&self, transport: Transport, target: SocketAddr) -> BoxFuture<'_, io::Result<Box<dyn Exchange>>> {
        Box::pin(async move {
            let exchange: Box<dyn Exchange> = match transport {
                Transport::Stream => Box::new(StreamExchange(TcpStream::connect(target).await?)),
                Transport::Datagram => {
                    let local: SocketAddr = if target.is_ipv4() {
                        (Ipv4Addr::UNSPECIFIED, 0).into()
                    } else {
                        (Ipv6Addr::UNSPECIFIED, 0).into()
                    };
                    let socket = UdpSocket::bind(local).await?;
                    socket.connect(target).await?;
                    Box::new(DatagramExchange(socket))
                }
            };
            Ok(exchange)
        })
    }
}

struct StreamExchange(TcpStream);

impl Exchange for StreamExchange {
    fn exchange<'a>(&'a mut self, query: &'a [u8]) -> BoxFuture<'a, io::Result<Vec<u8>>> {
        Box::pin(async move {
            write_frame(&mut self.0, query).await?;
            read_frame(&mut self.0)
                .await?
                .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed before reply"))
        })
    }
}

struct DatagramExchange(UdpSocket);

impl Exchange for DatagramExchange {
    fn exchange<'a>(&'a mut self, query: &'a [u8]) -> BoxFuture<'a, io::Result<Vec<u8>>> {
        Box::pin(async move {
            self.0.send(query).await?;
            let mut buf = vec![0u8; MAX_REPLY_SIZE];
            let len = self.0.recv(&mut buf).await?;
            buf.truncate(len);
            Ok(buf)
        })
    }
}
