//! The congestion adapter: a thin dispatcher that lets a connection remain
//! agnostic to which `CongestionController` it is driving, and exposes
//! `using_external` so extended stats (e.g. BBR's phase) are only surfaced
//! when a non-default variant is configured.

use super::reno::Reno;
use super::{Algorithm, CongestionController, CubicParams};
use crate::stats::Snapshot;
use std::time::Duration;

use super::bbr::Bbr;
use super::cubic::Cubic;
use super::vegas::Vegas;

/// Selects and owns one `CongestionController` for a connection.
///
/// `using_external` is `false` when no algorithm was configured, in which
/// case the adapter drives its own private Reno-equivalent default. It is
/// otherwise `true`, regardless of which external variant was chosen — Reno
/// included, since configuring it explicitly is still an external
/// selection.
pub struct CongestionAdapter {
    inner: Box<dyn CongestionController>,
    using_external: bool,
}

impl CongestionAdapter {
    pub fn new(algorithm: Option<Algorithm>, mss: u32, max_cwnd: u32, cubic: CubicParams) -> Self {
        match algorithm {
            None => CongestionAdapter {
                inner: Box::new(Reno::new(mss, max_cwnd)),
                using_external: false,
            },
            Some(Algorithm::Reno) => CongestionAdapter {
                inner: Box::new(Reno::new(mss, max_cwnd)),
                using_external: true,
            },
            Some(Algorithm::Cubic) => CongestionAdapter {
                inner: Box::new(Cubic::new(mss, max_cwnd, cubic)),
                using_external: true,
            },
            Some(Algorithm::Bbr) => CongestionAdapter {
                inner: Box::new(Bbr::new(mss, max_cwnd)),
                using_external: true,
            },
            Some(Algorithm::Vegas) => CongestionAdapter {
                inner: Box::new(Vegas::new(mss, max_cwnd)),
                using_external: true,
            },
        }
    }

    pub fn using_external(&self) -> bool {
        self.using_external
    }

    pub fn on_packet_sent(&self, size: u32) {
        self.inner.on_packet_sent(size);
    }

    pub fn on_ack_received(&self, size: u32, rtt: Option<Duration>) {
        self.inner.on_ack_received(size, rtt);
    }

    pub fn on_packet_lost(&self) {
        self.inner.on_packet_lost();
    }

    pub fn cwnd(&self) -> u32 {
        self.inner.cwnd()
    }

    pub fn send_rate(&self) -> f64 {
        self.inner.send_rate()
    }

    /// Extended fields (currently just `phase`) are only meaningful for an
    /// externally configured variant; the embedded default's snapshot always
    /// carries `phase: None` regardless.
    pub fn stats(&self) -> Snapshot {
        let snapshot = self.inner.stats();
        if self.using_external {
            snapshot
        } else {
            Snapshot {
                phase: None,
                ..snapshot
            }
        }
    }
}
