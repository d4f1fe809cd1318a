//! Request handler capability.

use crate::net::Transport;
use crate::protocol::message;

/// Turns one inbound request message into an optional response message.
///
/// Listeners call this once per request and never inspect the payload
/// themselves. Implementations must return promptly; returning `None` drops
/// the request without a reply.
pub trait RequestHandler: Send + Sync + 'static {
    fn handle(&self, request: &[u8], transport: Transport) -> Option<Vec<u8>>;
}

/// Answers every query with an empty NOERROR reply.
///
/// This is the catch-all the service installs for the root zone. Responses
/// and unparseable requests are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoHandler;

impl RequestHandler for EchoHandler {
    fn handle(&self, request: &[u8], transport: Transport) -> Option<Vec<u8>> {
        match message::build_reply(request) {
            Ok(reply) => Some(reply),
            Err(e) => {
                tracing::debug!(transport = %transport, error = %e, "Dropping unanswerable request");
                None
            }
        }
    }
}

impl<F> RequestHandler for F
where
    F: Fn(&[u8], Transport) -> Option<Vec<u8>> + Send + Sync + 'static,
{
    fn handle(&self, request: &[u8], transport: Transport) -> Option<Vec<u8>> {
        self(request, transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::{build_query, parse_reply, QTYPE_A};

    #[test]
    fn echo_answers_queries() {
        let query = build_query(9, "example.org", QTYPE_A).unwrap();
        let reply = EchoHandler.handle(&query, Transport::Datagram).unwrap();
        assert_eq!(parse_reply(&reply).unwrap().id, 9);
    }

    #[test]
    fn echo_drops_garbage_and_responses() {
        assert!(EchoHandler.handle(b"nope", Transport::Stream).is_none());

        let query = build_query(9, "example.org", QTYPE_A).unwrap();
        let reply = EchoHandler.handle(&query, Transport::Stream).unwrap();
        assert!(EchoHandler.handle(&reply, Transport::Stream).is_none());
    }

    #[test]
    fn closures_are_handlers() {
        let silent = |_: &[u8], _: Transport| -> Option<Vec<u8>> { None };
        let query = build_query(1, "example.org", QTYPE_A).unwrap();
        assert!(silent.handle(&query, Transport::Datagram).is_none());
    }
}
