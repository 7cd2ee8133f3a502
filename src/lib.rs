//! FILLP: a reliable, ordered, congestion-controlled datagram transport
//! running over an unreliable substrate, with pluggable congestion control
//! (Reno, CUBIC, BBR, Vegas) behind a uniform
//! [`congestion::CongestionController`] trait.
//!
//! The connection machinery — sliding-window send/receive, RTO-backed
//! retransmission, swappable congestion control — runs on plain
//! `std::net::UdpSocket` plus one `std::thread` per connection, rather than
//! a cooperative reactor, so a blocked peer only ever stalls its own
//! connection's threads.
//!
//! The top-level entry points are [`Connection::connect`] for clients and
//! [`Listener::bind`]/[`Listener::accept`] for servers.

pub mod config;
pub mod congestion;
pub mod connection;
pub mod constants;
pub mod error;
pub mod packet;
pub mod retransmission;
pub mod ring;
pub mod rtt;
pub mod seq;
pub mod stats;

pub use config::ConnectionConfig;
pub use connection::{Connection, Listener, State};
pub use error::{Error, Result};

/// Initializes `flexi_logger` for examples/tests; idempotent since
/// `flexi_logger` itself errors on a second `start()` in the same process,
/// which this silently ignores.
pub fn init_test_logging() {
    let _ = flexi_logger::Logger::try_with_env_or_str("warn")
        .expect("logging directive string is valid")
        .start();
}
