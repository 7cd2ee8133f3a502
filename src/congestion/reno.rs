//! Reno congestion control: additive-increase/multiplicative-decrease with
//! three-duplicate-ACK fast retransmit, the textbook baseline the other
//! variants are compared against.

use super::base::Base;
use super::CongestionController;
use crate::stats::Snapshot;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

const FAST_RETRANSMIT_THRESHOLD: u32 = 3;

#[derive(Debug)]
pub struct Reno {
    base: Base,
    duplicate_ack_count: AtomicU32,
}

impl Reno {
    pub fn new(mss: u32, max_cwnd: u32) -> Self {
        Reno {
            base: Base::new(mss, max_cwnd),
            duplicate_ack_count: AtomicU32::new(0),
        }
    }
}

impl CongestionController for Reno {
    fn on_packet_sent(&self, size: u32) {
        self.base.record_sent(size);
    }

    fn on_ack_received(&self, size: u32, rtt: Option<Duration>) {
        let mss = self.base.mss;

        if size == 0 {
            // Duplicate ACK.
            let count = self.duplicate_ack_count.fetch_add(1, Ordering::SeqCst) + 1;
            if count == FAST_RETRANSMIT_THRESHOLD {
                let cwnd = self.base.cwnd();
                let ssthresh = (cwnd / 2).max(2 * mss);
                self.base.set_ssthresh(ssthresh);
                self.base.set_cwnd(ssthresh + 3 * mss);
                self.base.record_fast_retransmit();
            } else if count > FAST_RETRANSMIT_THRESHOLD {
                self.base.set_cwnd(self.base.cwnd() + mss);
            }
            return;
        }

        self.duplicate_ack_count.store(0, Ordering::SeqCst);
        self.base.record_acked(size, rtt);

        let cwnd = self.base.cwnd();
        if cwnd < self.base.ssthresh() {
            // Slow start.
            self.base.set_cwnd(cwnd + mss);
        } else {
            // Congestion avoidance: cwnd += MSS^2 / cwnd per ACK.
            let increment = ((mss as u64 * mss as u64) / cwnd as u64).max(1) as u32;
            self.base.set_cwnd(cwnd + increment);
        }
    }

    fn on_packet_lost(&self) {
        let cwnd = self.base.cwnd();
        let ssthresh = (cwnd / 2).max(2 * self.base.mss);
        self.base.set_ssthresh(ssthresh);
        self.base.set_cwnd(ssthresh);
        self.base.record_lost();
        self.base.record_timeout_retransmit();
        self.duplicate_ack_count.store(0, Ordering::SeqCst);
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
