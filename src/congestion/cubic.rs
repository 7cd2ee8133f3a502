//! CUBIC congestion control: a cubic-root window-growth function of time
//! since the last loss event, rather than Reno's per-ACK linear increase.
//! This implementation skips RFC 8312's TCP-friendly hybrid-slow-start
//! region and simply advances toward the cubic target by at most one MSS
//! per ACK, which keeps convergence smooth without needing the
//! TCP-compatibility fallback that region exists for.

use super::base::Base;
use super::{CongestionController, CubicParams};
use crate::stats::Snapshot;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

const FAST_RETRANSMIT_THRESHOLD: u32 = 3;

struct CubicState {
    last_max_cwnd: f64,
    epoch_start: Instant,
    k: f64,
}

#[derive(Debug)]
pub struct Cubic {
    base: Base,
    beta: f64,
    c: f64,
    duplicate_ack_count: AtomicU32,
    state: Mutex<CubicState>,
}

impl Cubic {
    pub fn new(mss: u32, max_cwnd: u32, params: CubicParams) -> Self {
        Cubic {
            base: Base::new(mss, max_cwnd),
            beta: params.beta,
            c: params.c,
            duplicate_ack_count: AtomicU32::new(0),
            state: Mutex::new(CubicState {
                last_max_cwnd: (2 * mss) as f64,
                epoch_start: Instant::now(),
                k: 0.0,
            }),
        }
    }

    fn enter_congestion_avoidance(&self, cwnd: f64) {
        let mut state = self.state.lock();
        state.last_max_cwnd = cwnd;
        state.epoch_start = Instant::now();
        state.k = ((state.last_max_cwnd - self.beta * cwnd) / self.c).cbrt();
    }

    fn target_cwnd(&self) -> f64 {
        let state = self.state.lock();
        let t = state.epoch_start.elapsed().as_secs_f64();
        self.c * (t - state.k).powi(3) + state.last_max_cwnd
    }
}

impl CongestionController for Cubic {
    fn on_packet_sent(&self, size: u32) {
        self.base.record_sent(size);
    }

    fn on_ack_received(&self, size: u32, rtt: Option<Duration>) {
        let mss = self.base.mss;

        if size == 0 {
            let count = self.duplicate_ack_count.fetch_add(1, Ordering::SeqCst) + 1;
            if count == FAST_RETRANSMIT_THRESHOLD {
                let cwnd = self.base.cwnd();
                self.enter_congestion_avoidance(cwnd as f64);
                let reduced = (cwnd as f64 * self.beta) as u32;
                self.base.set_ssthresh(reduced);
                self.base.set_cwnd(reduced);
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
            // Slow start: identical growth law to Reno.
            self.base.set_cwnd(cwnd + mss.min(size));
        } else {
            // Congestion avoidance: step toward the cubic target, capped to
            // one MSS of movement per ACK.
            let target = self.target_cwnd();
            let diff = target - cwnd as f64;
            let step = diff.clamp(-(mss as f64), mss as f64);
            let next = (cwnd as f64 + step).max(0.0) as u32;
            self.base.set_cwnd(next);
        }
    }

    fn on_packet_lost(&self) {
        let cwnd = self.base.cwnd();
        self.enter_congestion_avoidance(cwnd as f64);
        let reduced = (cwnd as f64 * self.beta) as u32;
        self.base.set_ssthresh(reduced);
        self.base.set_cwnd(reduced);
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loss_reduction_tracks_beta() {
        let cubic = Cubic::new(1000, 1_000_000, CubicParams { beta: 0.7, c: 0.4 });
        cubic.base.set_cwnd(10_000);
        cubic.on_packet_lost();
        let cwnd = cubic.cwnd() as f64;
        assert!((cwnd - 7000.0).abs() / 7000.0 < 0.05, "cwnd={cwnd}");
    }

    #[test]
    fn a_higher_beta_retains_more_window() {
        let low_beta = Cubic::new(1000, 1_000_000, CubicParams { beta: 0.7, c: 0.4 });
        low_beta.base.set_cwnd(10_000);
        low_beta.on_packet_lost();

        let high_beta = Cubic::new(1000, 1_000_000, CubicParams { beta: 0.8, c: 0.4 });
        high_beta.base.set_cwnd(10_000);
        high_beta.on_packet_lost();

        assert!(high_beta.cwnd() > low_beta.cwnd());
        let cwnd = high_beta.cwnd() as f64;
        assert!((cwnd - 8000.0).abs() / 8000.0 < 0.05, "cwnd={cwnd}");
    }

    #[test]
    fn slow_start_matches_reno_growth() {
        let cubic = Cubic::new(1000, 1_000_000, CubicParams::default());
        let before = cubic.cwnd();
        cubic.on_ack_received(1000, Some(Duration::from_millis(50)));
        assert_eq!(cubic.cwnd(), before + 1000);
    }
}
