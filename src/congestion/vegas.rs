//! Vegas congestion control: adjusts cwnd from the gap between expected and
//! actual throughput (in bytes of standing queue) instead of waiting for a
//! loss signal, growing the window below the α threshold and shrinking it
//! above β.

use super::base::Base;
use super::CongestionController;
use crate::stats::Snapshot;
use std::time::Duration;

#[derive(Debug)]
pub struct Vegas {
    base: Base,
    alpha: f64,
    beta: f64,
}

impl Vegas {
    pub fn new(mss: u32, max_cwnd: u32) -> Self {
        Vegas {
            base: Base::new(mss, max_cwnd),
            alpha: 3.0 * mss as f64,
            beta: 6.0 * mss as f64,
        }
    }
}

impl CongestionController for Vegas {
    fn on_packet_sent(&self, size: u32) {
        self.base.record_sent(size);
    }

    fn on_ack_received(&self, size: u32, rtt: Option<Duration>) {
        if size == 0 {
            return;
        }
        let Some(rtt) = rtt else {
            self.base.record_acked(size, None);
            return;
        };
        self.base.record_acked(size, Some(rtt));

        let min_rtt = self.base.min_rtt().as_secs_f64();
        if min_rtt <= 0.0 {
            // No RTT sample yet; nothing to compare the actual rate against.
            return;
        }

        let actual_rate = size as f64 / rtt.as_secs_f64().max(f64::EPSILON);
        let expected_rate = self.base.cwnd() as f64 / min_rtt;
        // Expressed in bytes of standing queue, matching the units alpha/beta
        // are specified in (3×MSS / 6×MSS).
        let diff = (expected_rate - actual_rate) * min_rtt;

        let cwnd = self.base.cwnd();
        let mss = self.base.mss;
        if diff < self.alpha {
            self.base.set_cwnd(cwnd + mss);
        } else if diff > self.beta {
            self.base.set_cwnd(cwnd.saturating_sub(mss));
        }
    }

    fn on_packet_lost(&self) {
        let halved = self.base.cwnd() / 2;
        self.base.set_ssthresh(halved);
        self.base.set_cwnd(halved);
        self.base.record_lost();
        self.base.record_timeout_retransmit();
    }

    fn cwnd(&self) -> u32 {
        self.base.cwnd()
    }

    fn send_rate(&self) -> f64 {
        self.base.send_rate()
    }

    fn stats(&self) -> Snapshot {
        self.base.snapshot(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loss_halves_cwnd_and_ssthresh() {
        let vegas = Vegas::new(1000, 1_000_000);
        vegas.base.set_cwnd(20_000);
        vegas.on_packet_lost();
        assert_eq!(vegas.cwnd(), 10_000);
        assert_eq!(vegas.base.ssthresh(), 10_000);
    }

    #[test]
    fn zero_min_rtt_skips_update_without_panicking() {
        let vegas = Vegas::new(1000, 1_000_000);
        let before = vegas.cwnd();
        vegas.on_ack_received(1000, None);
        assert_eq!(vegas.cwnd(), before);
    }

    #[test]
    fn under_utilized_link_grows_window() {
        let vegas = Vegas::new(1000, 1_000_000);
        // Seed min_rtt with a fast sample, then observe a much slower actual
        // transfer — expected rate exceeds actual, so diff is small/negative
        // and cwnd should grow.
        vegas.on_ack_received(1000, Some(Duration::from_millis(10)));
        let before = vegas.cwnd();
        vegas.on_ack_received(1000, Some(Duration::from_millis(10)));
        assert!(vegas.cwnd() >= before);
    }
}
