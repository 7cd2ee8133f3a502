//! Cross-module end-to-end scenarios that need a real client and server
//! talking over loopback UDP; single-module invariants (ring overflow,
//! retransmission expiry, CUBIC/BBR loss response) live as unit tests
//! alongside their modules instead.

use fillp::{Connection, ConnectionConfig, Listener, State};
use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

fn loopback(port: u16) -> SocketAddr {
    format!("127.0.0.1:{port}").parse().unwrap()
}

/// A 5,000-byte payload, larger than one MSS, arrives intact and in order,
/// possibly assembled from several `receive()` calls.
#[test]
fn large_payload_fragmentation() {
    let addr = loopback(19_010);
    let listener = Listener::bind(addr, ConnectionConfig::default()).unwrap();

    let server = thread::spawn(move || {
        let conn = listener.accept().unwrap();
        let mut collected = Vec::new();
        while collected.len() < 5_000 {
            let chunk = conn.receive_timeout(Duration::from_secs(5)).unwrap();
            collected.extend_from_slice(&chunk);
        }
        collected
    });

    let client = Connection::connect(addr, ConnectionConfig::default()).unwrap();
    let payload: Vec<u8> = (0..5_000u32).map(|i| (i % 251) as u8).collect();
    client.send(&payload).unwrap();

    let received = server.join().unwrap();
    assert_eq!(received.len(), 5_000);
    assert_eq!(received, payload);
}

/// Ten rapid DATA segments with no application-level reply should collapse
/// onto the "ACK at least every other segment" rule, producing well under
/// one standalone ACK per segment.
#[test]
fn delayed_ack_batches_rapid_segments() {
    let addr = loopback(19_011);
    let config = ConnectionConfig::default().mss(64);
    let listener = Listener::bind(addr, config.clone()).unwrap();

    let server = thread::spawn(move || {
        let conn = listener.accept().unwrap();
        thread::sleep(Duration::from_millis(300));
        conn.standalone_ack_count()
    });

    let client = Connection::connect(addr, config).unwrap();
    for i in 0..10u8 {
        client.send(&[i; 32]).unwrap();
        // A hair of spacing keeps each send landing in its own MSS-sized
        // segment instead of letting the sender thread's ring read batch two
        // sends into one >32-byte segment, which would shift the ACK count.
        thread::sleep(Duration::from_millis(2));
    }

    let standalone_acks = server.join().unwrap();
    assert!(
        (5..=6).contains(&standalone_acks),
        "expected batched ACKs well under one-per-segment, got {standalone_acks}"
    );
}

/// A PING/PONG round trip should ride the server's reply as a piggybacked
/// ACK, so the server never needs a standalone ACK, and the loopback round
/// trip stays comfortably under 100ms.
#[test]
fn request_response_piggyback() {
    let addr = loopback(19_012);
    let listener = Listener::bind(addr, ConnectionConfig::default()).unwrap();

    let server = thread::spawn(move || {
        let conn = listener.accept().unwrap();
        let ping = conn.receive_timeout(Duration::from_secs(5)).unwrap();
        conn.send(&ping).unwrap();
        thread::sleep(Duration::from_millis(50));
        conn.standalone_ack_count()
    });

    let client = Connection::connect(addr, ConnectionConfig::default()).unwrap();
    let start = Instant::now();
    client.send(b"PING").unwrap();
    let pong = client.receive_timeout(Duration::from_secs(5)).unwrap();
    let elapsed = start.elapsed();

    assert_eq!(&pong[..], b"PING");
    assert!(elapsed < Duration::from_millis(100), "round trip took {elapsed:?}");

    let standalone_acks = server.join().unwrap();
    assert_eq!(standalone_acks, 0);
}

/// Universal invariant: a closed connection reports `Closed` and does not
/// hang the caller waiting on further data.
#[test]
fn close_transitions_both_sides_to_closed() {
    let addr = loopback(19_013);
    let listener = Listener::bind(addr, ConnectionConfig::default()).unwrap();

    let server = thread::spawn(move || {
        let conn = listener.accept().unwrap();
        conn.close().unwrap();
        conn.state()
    });

    let client = Connection::connect(addr, ConnectionConfig::default()).unwrap();
    client.close().unwrap();
    assert_eq!(client.state(), State::Closed);

    let server_state = server.join().unwrap();
    assert_eq!(server_state, State::Closed);
}
