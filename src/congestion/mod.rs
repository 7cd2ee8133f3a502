//! The polymorphic congestion-control family: one capability set, four
//! variants (Reno, CUBIC, BBR, Vegas) plus an embedded default, selected at
//! connection construction time by [`adapter::CongestionAdapter`].
//!
//! Each variant implements the same [`CongestionController`] trait rather
//! than splitting slow-start/congestion-avoidance, fast-retransmit, and
//! limited-transmit into separate traits — a single `on_ack_received`
//! already carries enough information (new-data size vs. duplicate) for
//! each algorithm to make its own internal phase decisions.

pub mod adapter;
pub mod base;
pub mod bbr;
pub mod cubic;
pub mod reno;
pub mod vegas;

use crate::stats::Snapshot;
use std::fmt::Debug;
use std::time::Duration;

/// Algorithm selection for the congestion adapter. An empty name parses to
/// `None`, which selects the embedded default one level up in
/// `config::ConnectionConfig`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Reno,
    Cubic,
    Bbr,
    Vegas,
}

impl Algorithm {
    pub fn parse(name: &str) -> Option<Option<Algorithm>> {
        match name {
            "" => Some(None),
            "reno" => Some(Some(Algorithm::Reno)),
            "cubic" => Some(Some(Algorithm::Cubic)),
            "bbr" => Some(Some(Algorithm::Bbr)),
            "vegas" => Some(Some(Algorithm::Vegas)),
            _ => None,
        }
    }
}

/// Only CUBIC consumes algorithm-specific parameters.
#[derive(Debug, Clone, Copy)]
pub struct CubicParams {
    pub beta: f64,
    pub c: f64,
}

impl Default for CubicParams {
    fn default() -> Self {
        CubicParams { beta: 0.7, c: 0.4 }
    }
}

/// The uniform capability set every variant implements. All operations are
/// concurrency-safe: implementations hold their own
/// read-write lock discipline (mutation takes the writer, queries take the
/// reader), independent of the connection's lock.
pub trait CongestionController: Debug + Send + Sync {
    /// A segment of `size` bytes was just transmitted for the first time.
    fn on_packet_sent(&self, size: u32);

    /// An ACK arrived. `size` is the number of newly-acknowledged bytes;
    /// `size == 0` signals a duplicate ACK (no new data acknowledged).
    /// `rtt` is the measured round-trip time for this ACK, when available.
    fn on_ack_received(&self, size: u32, rtt: Option<Duration>);

    /// A packet was judged lost (RTO expiry or fast-retransmit trigger).
    fn on_packet_lost(&self);

    fn cwnd(&self) -> u32;

    fn send_rate(&self) -> f64;

    fn stats(&self) -> Snapshot;
}
