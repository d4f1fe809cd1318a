//! Stream (TCP) serving with backpressure.
//!
//! # Responsibilities
//! - Accept connections, bounded by `max_connections` via semaphore
//! - Read and write length-prefixed DNS frames
//! - Close idle connections
//! - Join every connection task before returning

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time;

use crate::net::connection::{ConnectionGuard, ConnectionTracker};
use crate::net::listener::{stopped, BoundNotifier, ListenerError, ListenerId, ListenerOptions};
use crate::net::Transport;
use crate::observability::metrics;
use crate::protocol::RequestHandler;

/// Pause before accepting again after running out of descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

const ENOMEM: i32 = 12;
const ENFILE: i32 = 23;
const EMFILE: i32 = 24;
#[cfg(target_os = "linux")]
const ENOBUFS: i32 = 105;
#[cfg(not(target_os = "linux"))]
const ENOBUFS: i32 = 55;

/// Read one length-prefixed frame.
///
/// Returns `Ok(None)` on a clean EOF at a frame boundary or on a zero-length
/// frame.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u16().await {
        Ok(len) => usize::from(len),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };
    if len == 0 {
        return Ok(None);
    }

    let mut frame = vec![0u8; len];
    reader.read_exact(&mut frame).await?;
    Ok(Some(frame))
}

/// Write one length-prefixed frame.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u16::try_from(payload.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame of {} bytes exceeds 65535", payload.len()),
        )
    })?;

    let mut buf = Vec::with_capacity(payload.len() + 2);
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(payload);
    writer.write_all(&buf).await?;
    writer.flush().await
}

pub(crate) async fn serve(
    id: ListenerId,
    options: &ListenerOptions,
    handler: Arc<dyn RequestHandler>,
    bound: BoundNotifier,
    mut stop: watch::Receiver<bool>,
) -> Result<(), ListenerError> {
    let bind_err = |source| ListenerError::Bind { listener: id, source };
    let listener = TcpListener::bind(id.address).await.map_err(bind_err)?;
    let local_addr = listener.local_addr().map_err(bind_err)?;

    tracing::info!(
        listener = %id,
        address = %local_addr,
        max_connections = options.max_connections,
        "Listener bound"
    );
    metrics::record_listener_up(&id, true);
    let _ = bound.send(local_addr);

    let connection_limit = Arc::new(Semaphore::new(options.max_connections));
    let tracker = ConnectionTracker::new(id);
    let mut connections = JoinSet::new();

    let result = loop {
        // Acquire permit first (backpressure)
        let permit = tokio::select! {
            _ = stopped(&mut stop) => break Ok(()),
            Some(_) = connections.join_next() => continue,
            permit = Arc::clone(&connection_limit).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break Ok(()),
            },
        };

        let accepted = tokio::select! {
            _ = stopped(&mut stop) => break Ok(()),
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((socket, peer)) => {
                let guard = tracker.track();
                tracing::debug!(
                    listener = %id,
                    peer_addr = %peer,
                    connection_id = %guard.id(),
                    available_permits = connection_limit.available_permits(),
                    "Connection accepted"
                );
                connections.spawn(serve_connection(
                    socket,
                    peer,
                    Arc::clone(&handler),
                    options.idle_timeout,
                    stop.clone(),
                    permit,
                    guard,
                ));
            }
            Err(e) if is_transient(&e) => {
                tracing::debug!(listener = %id, error = %e, "Transient accept error");
            }
            Err(e) if is_resource_exhaustion(&e) => {
                tracing::warn!(
                    listener = %id,
                    error = %e,
                    backoff = ?ACCEPT_BACKOFF,
                    "Out of resources accepting connections; backing off"
                );
                tokio::select! {
                    _ = stopped(&mut stop) => break Ok(()),
                    _ = time::sleep(ACCEPT_BACKOFF) => {}
                }
            }
            Err(source) => break Err(ListenerError::Serve { listener: id, source }),
        }
    };

    // Free the port before waiting on connections.
    drop(listener);
    connections.shutdown().await;
    metrics::record_listener_up(&id, false);

    match &result {
        Ok(()) => tracing::info!(listener = %id, "Listener stopped"),
        Err(e) => tracing::error!(listener = %id, error = %e, "Listener failed"),
    }
    result
}

async fn serve_connection(
    mut socket: TcpStream,
    peer: SocketAddr,
    handler: Arc<dyn RequestHandler>,
    idle_timeout: Duration,
    mut stop: watch::Receiver<bool>,
    _permit: OwnedSemaphorePermit,
    guard: ConnectionGuard,
) {
    loop {
        let frame = tokio::select! {
            _ = stopped(&mut stop) => break,
            frame = time::timeout(idle_timeout, read_frame(&mut socket)) => frame,
        };

        let request = match frame {
            Ok(Ok(Some(request))) => request,
            Ok(Ok(None)) => break,
            Ok(Err(e)) => {
                tracing::debug!(peer_addr = %peer, connection_id = %guard.id(), error = %e, "Read failed");
                break;
            }
            Err(_) => {
                tracing::trace!(peer_addr = %peer, connection_id = %guard.id(), "Idle timeout");
                break;
            }
        };

        metrics::record_request(Transport::Stream);
        let Some(response) = handler.handle(&request, Transport::Stream) else {
            continue;
        };

        if let Err(e) = write_frame(&mut socket, &response).await {
            tracing::debug!(peer_addr = %peer, connection_id = %guard.id(), error = %e, "Write failed");
            break;
        }
    }

    let _ = socket.shutdown().await;
}

/// Per-connection failures; the next accept is unaffected.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

/// Process or system limits (descriptors, buffers, memory). These clear
/// once connections close, so accepting resumes after a pause.
fn is_resource_exhaustion(e: &io::Error) -> bool {
    if e.kind() == io::ErrorKind::OutOfMemory {
        return true;
    }
    matches!(e.raw_os_error(), Some(EMFILE | ENFILE | ENOBUFS | ENOMEM))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_exhaustion_is_recoverable() {
        for code in [EMFILE, ENFILE, ENOBUFS, ENOMEM] {
            let e = io::Error::from_raw_os_error(code);
            assert!(is_resource_exhaustion(&e), "os error {code} should back off");
            assert!(!is_transient(&e));
        }
    }

    #[test]
    fn other_accept_errors_are_classified() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionAborted)));
        assert!(!is_resource_exhaustion(&io::Error::from(io::ErrorKind::PermissionDenied)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }

    #[tokio::test]
    async fn frames_round_trip_through_a_pipe() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        write_frame(&mut client, b"hello").await.unwrap();
        write_frame(&mut client, b"world!").await.unwrap();
        drop(client);

        assert_eq!(read_frame(&mut server).await.unwrap().as_deref(), Some(&b"hello"[..]));
        assert_eq!(read_frame(&mut server).await.unwrap().as_deref(), Some(&b"world!"[..]));
        assert_eq!(read_frame(&mut server).await.unwrap(), None);
    }

    #[tokio::test]
    async fn zero_length_frame_ends_the_stream() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0, 0]).await.unwrap();
        assert_eq!(read_frame(&mut server).await.unwrap(), None);
    }

    #[tokio::test]
    async fn truncated_frame_is_an_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0, 10, 1, 2, 3]).await.unwrap();
        drop(client);
        let err = read_frame(&mut server).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let (mut client, _server) = tokio::io::duplex(64);
        let err = write_frame(&mut client, &vec![0u8; 70_000]).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
