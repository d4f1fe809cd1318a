//! Socket-level tests for `DnsListener`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::oneshot;
use tokio::time::timeout;

use dns_server::net::stream::{read_frame, write_frame};
use dns_server::net::{DnsListener, Listener, ListenerError, ListenerOptions, Transport};
use dns_server::protocol::message::{build_query, build_reply, parse_reply, QTYPE_A};
use dns_server::protocol::{EchoHandler, RequestHandler};

mod common;

fn echo_listener(transport: Transport, addr: std::net::SocketAddr) -> Arc<DnsListener> {
    Arc::new(DnsListener::new(transport, addr, ListenerOptions::default(), Arc::new(EchoHandler)))
}

/// Start `listener` on its own task and wait until it is bound.
async fn spawn_listener(listener: Arc<DnsListener>) -> tokio::task::JoinHandle<Result<(), ListenerError>> {
    let (tx, rx) = oneshot::channel();
    let task = {
        let listener = Arc::clone(&listener);
        tokio::spawn(async move { listener.start(tx).await })
    };
    timeout(Duration::from_secs(1), rx).await.expect("bound in time").expect("bound");
    task
}

#[tokio::test]
async fn test_udp_listener_answers_queries() {
    let addr = common::free_addr();
    let listener = echo_listener(Transport::Datagram, addr);
    let task = spawn_listener(Arc::clone(&listener)).await;

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.connect(addr).await.unwrap();
    client.send(&build_query(0x1234, "example.com", QTYPE_A).unwrap()).await.unwrap();

    let mut buf = [0u8; 512];
    let n = timeout(Duration::from_secs(1), client.recv(&mut buf)).await.unwrap().unwrap();
    assert_eq!(parse_reply(&buf[..n]).unwrap().id, 0x1234);

    listener.stop();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_tcp_listener_answers_framed_queries() {
    let addr = common::free_addr();
    let listener = echo_listener(Transport::Stream, addr);
    let task = spawn_listener(Arc::clone(&listener)).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    for id in [1u16, 2, 3] {
        write_frame(&mut client, &build_query(id, "example.com", QTYPE_A).unwrap()).await.unwrap();
        let reply = read_frame(&mut client).await.unwrap().expect("reply frame");
        assert_eq!(parse_reply(&reply).unwrap().id, id);
    }
    drop(client);

    listener.stop();
    timeout(Duration::from_secs(1), task).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn test_stop_releases_the_address() {
    let addr = common::free_addr();

    for transport in [Transport::Stream, Transport::Datagram] {
        let first = echo_listener(transport, addr);
        let task = spawn_listener(Arc::clone(&first)).await;
        first.stop();
        task.await.unwrap().unwrap();

        let second = echo_listener(transport, addr);
        let task = spawn_listener(Arc::clone(&second)).await;
        second.stop();
        task.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let addr = common::free_addr();
    let listener = echo_listener(Transport::Stream, addr);
    let task = spawn_listener(Arc::clone(&listener)).await;

    listener.stop();
    task.await.unwrap().unwrap();
    listener.stop();
    listener.stop();
}

#[tokio::test]
async fn test_stop_before_start_never_binds() {
    let addr = common::free_addr();
    let listener = echo_listener(Transport::Datagram, addr);
    listener.stop();

    let (tx, rx) = oneshot::channel();
    listener.start(tx).await.unwrap();
    assert!(rx.await.is_err(), "no address should be reported");
}

#[tokio::test]
async fn test_second_start_is_rejected() {
    let addr = common::free_addr();
    let listener = echo_listener(Transport::Datagram, addr);
    let task = spawn_listener(Arc::clone(&listener)).await;

    let (tx, _rx) = oneshot::channel();
    let err = listener.start(tx).await.unwrap_err();
    assert!(matches!(err, ListenerError::AlreadyStarted(id) if id == listener.id()));

    listener.stop();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_bind_conflict_is_reported() {
    let addr = common::free_addr();
    let _occupied = std::net::TcpListener::bind(addr).unwrap();

    let listener = echo_listener(Transport::Stream, addr);
    let (tx, rx) = oneshot::channel();
    let err = listener.start(tx).await.unwrap_err();

    assert!(err.is_bind());
    assert_eq!(err.listener(), listener.id());
    assert!(rx.await.is_err());
}

#[tokio::test]
async fn test_silent_handler_sends_nothing() {
    let addr = common::free_addr();
    let listener = Arc::new(DnsListener::datagram(addr, ListenerOptions::default(), common::silent_handler()));
    let task = spawn_listener(Arc::clone(&listener)).await;

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.connect(addr).await.unwrap();
    client.send(&build_query(7, "example.com", QTYPE_A).unwrap()).await.unwrap();

    let mut buf = [0u8; 512];
    assert!(timeout(Duration::from_millis(200), client.recv(&mut buf)).await.is_err());

    listener.stop();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_connection_limit_applies_backpressure() {
    let addr = common::free_addr();
    let options = ListenerOptions {
        max_connections: 1,
        ..ListenerOptions::default()
    };
    let listener = Arc::new(DnsListener::stream(addr, options, Arc::new(EchoHandler)));
    let task = spawn_listener(Arc::clone(&listener)).await;

    // The first client is accepted and holds the only slot.
    let mut first = TcpStream::connect(addr).await.unwrap();
    write_frame(&mut first, &build_query(1, "example.com", QTYPE_A).unwrap()).await.unwrap();
    assert!(read_frame(&mut first).await.unwrap().is_some());

    let mut second = TcpStream::connect(addr).await.unwrap();
    write_frame(&mut second, &build_query(2, "example.com", QTYPE_A).unwrap()).await.unwrap();
    assert!(
        timeout(Duration::from_millis(200), read_frame(&mut second)).await.is_err(),
        "second client served while the limit was reached"
    );

    drop(first);
    let reply = timeout(Duration::from_secs(1), read_frame(&mut second))
        .await
        .expect("served once the slot frees up")
        .unwrap()
        .expect("reply frame");
    assert_eq!(parse_reply(&reply).unwrap().id, 2);

    drop(second);
    listener.stop();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_idle_connection_is_closed() {
    let addr = common::free_addr();
    let options = ListenerOptions {
        idle_timeout: Duration::from_millis(100),
        ..ListenerOptions::default()
    };
    let listener = Arc::new(DnsListener::stream(addr, options, Arc::new(EchoHandler)));
    let task = spawn_listener(Arc::clone(&listener)).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    let started = Instant::now();
    let closed = timeout(Duration::from_secs(1), read_frame(&mut client))
        .await
        .expect("server closed the idle connection");

    assert_eq!(closed.unwrap(), None);
    assert!(started.elapsed() >= Duration::from_millis(90), "closed too early: {:?}", started.elapsed());

    listener.stop();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_oversized_reply_is_dropped() {
    let addr = common::free_addr();
    let options = ListenerOptions {
        max_datagram_size: 512,
        ..ListenerOptions::default()
    };
    // Query ID 1 gets a reply that cannot fit; anything else a normal one.
    let handler: Arc<dyn RequestHandler> = Arc::new(|request: &[u8], _: Transport| -> Option<Vec<u8>> {
        match request.get(..2) {
            Some([0, 1]) => Some(vec![0u8; 600]),
            _ => build_reply(request).ok(),
        }
    });
    let listener = Arc::new(DnsListener::datagram(addr, options, handler));
    let task = spawn_listener(Arc::clone(&listener)).await;

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.connect(addr).await.unwrap();
    let mut buf = [0u8; 1024];

    client.send(&build_query(1, "example.com", QTYPE_A).unwrap()).await.unwrap();
    assert!(timeout(Duration::from_millis(200), client.recv(&mut buf)).await.is_err());

    client.send(&build_query(2, "example.com", QTYPE_A).unwrap()).await.unwrap();
    let n = timeout(Duration::from_secs(1), client.recv(&mut buf)).await.unwrap().unwrap();
    assert_eq!(parse_reply(&buf[..n]).unwrap().id, 2);

    listener.stop();
    task.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_datagram_requests_in_flight_are_bounded() {
    let addr = common::free_addr();
    let options = ListenerOptions {
        max_connections: 1,
        ..ListenerOptions::default()
    };
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let handler: Arc<dyn RequestHandler> = {
        let (running, peak) = (Arc::clone(&running), Arc::clone(&peak));
        Arc::new(move |request: &[u8], _: Transport| -> Option<Vec<u8>> {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(30));
            running.fetch_sub(1, Ordering::SeqCst);
            build_reply(request).ok()
        })
    };
    let listener = Arc::new(DnsListener::datagram(addr, options, handler));
    let task = spawn_listener(Arc::clone(&listener)).await;

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.connect(addr).await.unwrap();
    for id in 0..5u16 {
        client.send(&build_query(id, "example.com", QTYPE_A).unwrap()).await.unwrap();
    }

    let mut buf = [0u8; 512];
    for _ in 0..5 {
        timeout(Duration::from_secs(2), client.recv(&mut buf)).await.unwrap().unwrap();
    }
    assert_eq!(peak.load(Ordering::SeqCst), 1);

    listener.stop();
    task.await.unwrap().unwrap();
}
