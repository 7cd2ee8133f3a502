//! Fields and clamp logic shared by every congestion-control variant: cwnd,
//! ssthresh, in-flight byte accounting, and the per-controller RTT sample
//! feed they all need regardless of which growth law they apply on top.

use crate::rtt::RttEstimator;
use crate::stats::Snapshot;
use parking_lot::RwLock;
use std::time::{Duration, Instant};

struct Inner {
    cwnd: u32,
    ssthresh: u32,
    in_flight: u32,
    rtt: RttEstimator,
    sent: u64,
    acked: u64,
    lost: u64,
    fast_retransmits: u64,
    timeout_retransmits: u64,
    last_activity: Instant,
}

/// Shared state every `CongestionController` variant embeds. `mss` and
/// `max_cwnd` are immutable for the life of the controller; everything else
/// lives behind the controller's own read-write lock, independent of the
/// connection's lock.
pub struct Base {
    pub mss: u32,
    pub max_cwnd: u32,
    inner: RwLock<Inner>,
}

impl Base {
    pub fn new(mss: u32, max_cwnd: u32) -> Self {
        let initial_cwnd = clamp(2 * mss, mss, max_cwnd);
        Base {
            mss,
            max_cwnd,
            inner: RwLock::new(Inner {
                cwnd: initial_cwnd,
                ssthresh: max_cwnd,
                in_flight: 0,
                rtt: RttEstimator::new(),
                sent: 0,
                acked: 0,
                lost: 0,
                fast_retransmits: 0,
                timeout_retransmits: 0,
                last_activity: Instant::now(),
            }),
        }
    }

    pub fn cwnd(&self) -> u32 {
        self.inner.read().cwnd
    }

    pub fn ssthresh(&self) -> u32 {
        self.inner.read().ssthresh
    }

    pub fn in_flight(&self) -> u32 {
        self.inner.read().in_flight
    }

    /// `cwnd ∈ [2*mss, max_cwnd]` on every mutation, the invariant every
    /// variant relies on.
    pub fn clamp(&self, value: u32) -> u32 {
        clamp(value, self.mss, self.max_cwnd)
    }

    pub fn set_cwnd(&self, value: u32) {
        let clamped = self.clamp(value);
        self.inner.write().cwnd = clamped;
    }

    pub fn set_ssthresh(&self, value: u32) {
        self.inner.write().ssthresh = value.max(2 * self.mss);
    }

    pub fn record_sent(&self, size: u32) {
        let mut inner = self.inner.write();
        inner.in_flight += size;
        inner.sent += 1;
        inner.last_activity = Instant::now();
    }

    pub fn record_acked(&self, size: u32, rtt: Option<Duration>) {
        let mut inner = self.inner.write();
        inner.in_flight = inner.in_flight.saturating_sub(size);
        inner.acked += 1;
        if let Some(rtt) = rtt {
            inner.rtt.update(rtt);
        }
        inner.last_activity = Instant::now();
    }

    pub fn record_lost(&self) {
        let mut inner = self.inner.write();
        inner.lost += 1;
    }

    pub fn record_fast_retransmit(&self) {
        self.inner.write().fast_retransmits += 1;
    }

    pub fn record_timeout_retransmit(&self) {
        self.inner.write().timeout_retransmits += 1;
    }

    pub fn smoothed_rtt(&self) -> Duration {
        self.inner.read().rtt.smoothed_rtt()
    }

    pub fn min_rtt(&self) -> Duration {
        self.inner.read().rtt.min_rtt()
    }

    pub fn rto(&self) -> Duration {
        self.inner.read().rtt.rto()
    }

    pub fn send_rate(&self) -> f64 {
        let inner = self.inner.read();
        let rtt = inner.rtt.smoothed_rtt().as_secs_f64();
        if rtt <= 0.0 {
            0.0
        } else {
            inner.cwnd as f64 / rtt
        }
    }

    pub fn snapshot(&self, phase: Option<&'static str>) -> Snapshot {
        let inner = self.inner.read();
        let loss_rate = if inner.sent == 0 {
            0.0
        } else {
            inner.lost as f64 / inner.sent as f64
        };
        Snapshot {
            cwnd: inner.cwnd,
            ssthresh: inner.ssthresh,
            smoothed_rtt: inner.rtt.smoothed_rtt(),
            min_rtt: inner.rtt.min_rtt(),
            loss_rate,
            send_rate: if inner.rtt.smoothed_rtt().as_secs_f64() > 0.0 {
                inner.cwnd as f64 / inner.rtt.smoothed_rtt().as_secs_f64()
            } else {
                0.0
            },
            in_flight: inner.in_flight,
            packets_sent: inner.sent,
            packets_acked: inner.acked,
            packets_lost: inner.lost,
            fast_retransmits: inner.fast_retransmits,
            timeout_retransmits: inner.timeout_retransmits,
            phase,
        }
    }
}

fn clamp(value: u32, mss: u32, max_cwnd: u32) -> u32 {
    value.max(2 * mss).min(max_cwnd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cwnd_never_leaves_the_clamp_range() {
        let base = Base::new(1380, 100_000);
        base.set_cwnd(0);
        assert_eq!(base.cwnd(), 2 * 1380);
        base.set_cwnd(u32::MAX);
        assert_eq!(base.cwnd(), 100_000);
    }
}
