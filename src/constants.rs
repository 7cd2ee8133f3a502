//! Compile-time protocol constants.

use std::time::Duration;

/// Maximum transmission unit assumed for the underlying datagram substrate.
pub const MTU: usize = 1400;

/// Fixed wire header size (type + flags + seq + ack + window + timestamp + checksum).
pub const HEADER_LEN: usize = 1 + 1 + 4 + 4 + 4 + 4 + 4;

/// Maximum segment size: the largest payload carried by a single packet.
pub const MSS: usize = MTU - HEADER_LEN;

pub const DEFAULT_WINDOW_SIZE: u32 = 65536;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(10);
pub const MAX_RETRANSMISSIONS: u32 = 5;

pub const INITIAL_RTO: Duration = Duration::from_millis(200);
pub const MIN_RTO: Duration = Duration::from_millis(50);
pub const MAX_RTO: Duration = Duration::from_secs(10);

pub const DELAYED_ACK_DEADLINE: Duration = Duration::from_millis(40);

pub const BBR_BW_WINDOW: usize = 10;
pub const PROBE_RTT_DURATION: Duration = Duration::from_millis(200);
pub const PROBE_BW_PERIOD: Duration = Duration::from_secs(10);

/// Retransmission tick interval: how often the background timer scans the
/// retransmission queue for expired entries.
pub const RETRANSMIT_TICK: Duration = Duration::from_millis(10);

/// Handshake retry budget and per-attempt interval.
pub const HANDSHAKE_RETRIES: u32 = 5;
pub const HANDSHAKE_RETRY_INTERVAL: Duration = Duration::from_millis(200);

/// Poll interval used while a sender waits for peer/congestion window
/// budget to free up.
pub const WINDOW_POLL_INTERVAL: Duration = Duration::from_millis(5);
