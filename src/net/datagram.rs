//! Datagram (UDP) serving.
//!
//! # Responsibilities
//! - Receive one request per datagram, up to `max_datagram_size`
//! - Hand each request to the handler on its own task, at most
//!   `max_connections` at a time
//! - Send the reply back to the peer
//! - Surface receive failures as serve errors

use std::io;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

use crate::net::listener::{stopped, BoundNotifier, ListenerError, ListenerId, ListenerOptions};
use crate::net::Transport;
use crate::observability::metrics;
use crate::protocol::RequestHandler;

pub(crate) async fn serve(
    id: ListenerId,
    options: &ListenerOptions,
    handler: Arc<dyn RequestHandler>,
    bound: BoundNotifier,
    mut stop: watch::Receiver<bool>,
) -> Result<(), ListenerError> {
    let bind_err = |source| ListenerError::Bind { listener: id, source };
    let socket = UdpSocket::bind(id.address).await.map_err(bind_err)?;
    let local_addr = socket.local_addr().map_err(bind_err)?;

    tracing::info!(
        listener = %id,
        address = %local_addr,
        max_datagram_size = options.max_datagram_size,
        "Listener bound"
    );
    metrics::record_listener_up(&id, true);
    let _ = bound.send(local_addr);

    let socket = Arc::new(socket);
    let max_size = options.max_datagram_size;
    let mut buf = vec![0u8; max_size];
    let request_limit = Arc::new(Semaphore::new(options.max_connections));
    let mut in_flight = JoinSet::new();

    let result = loop {
        // Stop reading while the handler backlog is full.
        let permit = tokio::select! {
            _ = stopped(&mut stop) => break Ok(()),
            Some(_) = in_flight.join_next() => continue,
            permit = Arc::clone(&request_limit).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break Ok(()),
            },
        };

        let received = tokio::select! {
            _ = stopped(&mut stop) => break Ok(()),
            received = socket.recv_from(&mut buf) => received,
        };

        match received {
            Ok((len, peer)) => {
                metrics::record_request(Transport::Datagram);
                let request = buf[..len].to_vec();
                let handler = Arc::clone(&handler);
                let socket = Arc::clone(&socket);
                in_flight.spawn(async move {
                    let _permit = permit;
                    let Some(response) = handler.handle(&request, Transport::Datagram) else {
                        return;
                    };
                    if response.len() > max_size {
                        tracing::warn!(
                            peer_addr = %peer,
                            size = response.len(),
                            max_datagram_size = max_size,
                            "Dropping oversized reply"
                        );
                        return;
                    }
                    if let Err(e) = socket.send_to(&response, peer).await {
                        tracing::debug!(peer_addr = %peer, error = %e, "Send failed");
                    }
                });
            }
            // ICMP port unreachable from an earlier reply surfaces here on some platforms.
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                tracing::debug!(listener = %id, error = %e, "Ignoring reset from peer");
            }
            Err(source) => break Err(ListenerError::Serve { listener: id, source }),
        }
    };

    in_flight.shutdown().await;
    drop(socket);
    metrics::record_listener_up(&id, false);

    match &result {
        Ok(()) => tracing::info!(listener = %id, "Listener stopped"),
        Err(e) => tracing::error!(listener = %id, error = %e, "Listener failed"),
    }
    result
}
