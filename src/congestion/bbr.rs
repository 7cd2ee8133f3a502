//! BBR congestion control: a four-phase (STARTUP/DRAIN/PROBE_BW/PROBE_RTT)
//! model-based controller that paces cwnd off an estimated bottleneck
//! bandwidth and min RTT rather than reacting to loss, so it only cuts
//! cwnd by 10% on a retransmit instead of halving it.

use super::base::Base;
use super::CongestionController;
use crate::constants::{BBR_BW_WINDOW, PROBE_BW_PERIOD, PROBE_RTT_DURATION};
use crate::stats::Snapshot;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Startup,
    Drain,
    ProbeBw,
    ProbeRtt,
}

impl Phase {
    fn label(self) -> &'static str {
        match self {
            Phase::Startup => "STARTUP",
            Phase::Drain => "DRAIN",
            Phase::ProbeBw => "PROBE_BW",
            Phase::ProbeRtt => "PROBE_RTT",
        }
    }
}

const STARTUP_GAIN: f64 = 2.0;
const DRAIN_GAIN: f64 = 0.5;
const PROBE_BW_CWND_GAIN: f64 = 2.0;

struct State {
    phase: Phase,
    bw_samples: VecDeque<f64>,
    estimated_bw: f64,
    last_probe_bw_entry: Instant,
    probe_rtt_start: Option<Instant>,
}

#[derive(Debug)]
pub struct Bbr {
    base: Base,
    state: Mutex<State>,
}

impl Bbr {
    pub fn new(mss: u32, max_cwnd: u32) -> Self {
        Bbr {
            base: Base::new(mss, max_cwnd),
            state: Mutex::new(State {
                phase: Phase::Startup,
                bw_samples: VecDeque::with_capacity(BBR_BW_WINDOW),
                estimated_bw: 0.0,
                last_probe_bw_entry: Instant::now(),
                probe_rtt_start: None,
            }),
        }
    }

    fn cwnd_target(&self, gain: f64) -> u32 {
        let min_rtt = self.base.min_rtt().as_secs_f64();
        if min_rtt <= 0.0 {
            return self.base.cwnd();
        }
        let bdp = self.state.lock().estimated_bw * min_rtt;
        (bdp * gain) as u32
    }
}

impl CongestionController for Bbr {
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

        let sample = size as f64 / rtt.as_secs_f64().max(f64::EPSILON);
        let mut state = self.state.lock();
        let prior_bw = state.estimated_bw;
        if state.bw_samples.len() == BBR_BW_WINDOW {
            state.bw_samples.pop_front();
        }
        state.bw_samples.push_back(sample);
        state.estimated_bw = state.bw_samples.iter().cloned().fold(0.0, f64::max);

        match state.phase {
            Phase::Startup => {
                let target = (state.estimated_bw * self.base.min_rtt().as_secs_f64() * STARTUP_GAIN)
                    as u32;
                drop(state);
                self.base.set_cwnd(target.max(self.base.cwnd()));

                // Peak detected: the latest sample undershoots 90% of the
                // estimate we had coming in, so bandwidth has stopped growing.
                if prior_bw > 0.0 && sample < 0.9 * prior_bw {
                    let mut state = self.state.lock();
                    state.phase = Phase::Drain;
                }
            }
            Phase::Drain => {
                let target = self.cwnd_target_locked(&state, DRAIN_GAIN);
                drop(state);
                self.base.set_cwnd(target);

                let in_flight = self.base.in_flight();
                let bdp = self.state.lock().estimated_bw * self.base.min_rtt().as_secs_f64();
                if (in_flight as f64) < bdp {
                    let mut state = self.state.lock();
                    state.phase = Phase::ProbeBw;
                    state.last_probe_bw_entry = Instant::now();
                }
            }
            Phase::ProbeBw => {
                let target = self.cwnd_target_locked(&state, PROBE_BW_CWND_GAIN);
                let enter_probe_rtt = state.last_probe_bw_entry.elapsed() >= PROBE_BW_PERIOD;
                drop(state);
                self.base.set_cwnd(target);

                if enter_probe_rtt {
                    let mut state = self.state.lock();
                    state.phase = Phase::ProbeRtt;
                    state.probe_rtt_start = Some(Instant::now());
                    drop(state);
                    self.base.set_cwnd(4 * self.base.mss);
                }
            }
            Phase::ProbeRtt => {
                let started = state.probe_rtt_start.unwrap_or_else(Instant::now);
                if started.elapsed() >= PROBE_RTT_DURATION {
                    state.phase = Phase::ProbeBw;
                    state.last_probe_bw_entry = Instant::now();
                    state.probe_rtt_start = None;
                }
            }
        }
    }

    fn on_packet_lost(&self) {
        let cwnd = self.base.cwnd();
        self.base.set_cwnd((cwnd as f64 * 0.9) as u32);
        self.base.record_lost();
        self.base.record_timeout_retransmit();
    }

    fn cwnd(&self) -> u32 {
        self.base.cwnd()
    }

    fn send_rate(&self) -> f64 {
        self.state.lock().estimated_bw
    }

    fn stats(&self) -> Snapshot {
        let phase = self.state.lock().phase.label();
        self.base.snapshot(Some(phase))
    }
}

impl Bbr {
    fn cwnd_target_locked(&self, state: &State, gain: f64) -> u32 {
        let min_rtt = self.base.min_rtt().as_secs_f64();
        if min_rtt <= 0.0 {
            return self.base.cwnd();
        }
        (state.estimated_bw * min_rtt * gain) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warm_up(bbr: &Bbr, acks: usize) {
        for _ in 0..acks {
            bbr.on_ack_received(1400, Some(Duration::from_millis(50)));
        }
    }

    #[test]
    fn loss_reduces_cwnd_mildly() {
        let bbr = Bbr::new(1400, 10_000_000);
        warm_up(&bbr, 10);
        let before = bbr.cwnd() as f64;
        bbr.on_packet_lost();
        let after = bbr.cwnd() as f64;
        let drop_fraction = (before - after) / before;
        assert!(drop_fraction <= 0.2, "drop_fraction={drop_fraction}");
    }

    #[test]
    fn reno_style_loss_would_drop_far_more() {
        // Sanity check for the contrast: Reno-style halving is a much
        // larger cut than BBR's 10%.
        let before = 100_000.0f64;
        let reno_after = before / 2.0;
        assert!((before - reno_after) / before >= 0.5);
    }

    #[test]
    fn phase_starts_in_startup() {
        let bbr = Bbr::new(1400, 10_000_000);
        assert_eq!(bbr.stats().phase, Some("STARTUP"));
    }
}
