//! Read-only statistics snapshots, returned by value so a caller can poll a
//! connection's state without holding any of its internal locks.

use std::time::Duration;

/// Congestion-controller snapshot; `phase` is populated only for the BBR
/// variant, and only when the adapter is driving an externally configured
/// controller rather than the embedded default.
#[derive(Debug, Clone, Copy)]
pub struct Snapshot {
    pub cwnd: u32,
    pub ssthresh: u32,
    pub smoothed_rtt: Duration,
    pub min_rtt: Duration,
    pub loss_rate: f64,
    pub send_rate: f64,
    pub in_flight: u32,
    pub packets_sent: u64,
    pub packets_acked: u64,
    pub packets_lost: u64,
    pub fast_retransmits: u64,
    pub timeout_retransmits: u64,
    pub phase: Option<&'static str>,
}

/// Connection-level statistics snapshot.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub retransmissions: u64,
    pub checksum_mismatches: u64,
    pub rtt: Duration,
    pub congestion: Snapshot,
}
