//! RTT/RTO estimator: a Jacobson/Karels-style smoothed-RTT and variance
//! tracker, plus a monotonically-decreasing min-RTT, used to derive the
//! retransmission timeout.

use crate::constants::{INITIAL_RTO, MAX_RTO, MIN_RTO};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RttEstimator {
    smoothed: Option<Duration>,
    variance: Duration,
    min_rtt: Option<Duration>,
}

impl Default for RttEstimator {
    fn default() -> Self {
        RttEstimator {
            smoothed: None,
            variance: Duration::ZERO,
            min_rtt: None,
        }
    }
}

impl RttEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in a fresh RTT sample. First sample seeds both smoothed RTT and
    /// min RTT; subsequent samples apply the `0.875/0.125` EWMA weighting.
    pub fn update(&mut self, sample: Duration) {
        match self.smoothed {
            None => {
                self.smoothed = Some(sample);
                self.variance = sample / 2;
            }
            Some(prior) => {
                let diff = abs_diff(prior, sample);
                self.variance = (self.variance * 3 + diff) / 4;
                self.smoothed = Some(weighted_average(prior, sample));
            }
        }

        self.min_rtt = Some(match self.min_rtt {
            Some(min) if min <= sample => min,
            _ => sample,
        });
    }

    pub fn smoothed_rtt(&self) -> Duration {
        self.smoothed.unwrap_or(INITIAL_RTO)
    }

    pub fn min_rtt(&self) -> Duration {
        self.min_rtt.unwrap_or(Duration::ZERO)
    }

    /// `smoothed + 4*variance`, clamped to `[MinRTO, MaxRTO]`. Returns the
    /// configured initial RTO before any sample has arrived.
    pub fn rto(&self) -> Duration {
        let rto = match self.smoothed {
            None => return INITIAL_RTO,
            Some(smoothed) => smoothed.saturating_add(self.variance * 4),
        };
        rto.clamp(MIN_RTO, MAX_RTO)
    }
}

fn abs_diff(a: Duration, b: Duration) -> Duration {
    if a > b {
        a - b
    } else {
        b - a
    }
}

/// `0.875 * prior + 0.125 * sample`, computed in nanoseconds to avoid
/// floating point drift across long-running connections.
fn weighted_average(prior: Duration, sample: Duration) -> Duration {
    let prior_ns = prior.as_nanos() as u64;
    let sample_ns = sample.as_nanos() as u64;
    let weighted = (prior_ns * 7 + sample_ns) / 8;
    Duration::from_nanos(weighted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_seeds_smoothed_and_min() {
        let mut rtt = RttEstimator::new();
        rtt.update(Duration::from_millis(100));
        assert_eq!(rtt.smoothed_rtt(), Duration::from_millis(100));
        assert_eq!(rtt.min_rtt(), Duration::from_millis(100));
    }

    #[test]
    fn min_rtt_never_increases() {
        let mut rtt = RttEstimator::new();
        let samples = [100u64, 80, 120, 60, 200];
        let mut last_min = Duration::MAX;
        for ms in samples {
            rtt.update(Duration::from_millis(ms));
            assert!(rtt.min_rtt() <= last_min);
            last_min = rtt.min_rtt();
        }
        assert_eq!(rtt.min_rtt(), Duration::from_millis(60));
    }

    #[test]
    fn rto_is_clamped_to_bounds() {
        let mut rtt = RttEstimator::new();
        rtt.update(Duration::from_micros(1));
        assert!(rtt.rto() >= MIN_RTO);

        rtt.update(Duration::from_secs(100));
        assert!(rtt.rto() <= MAX_RTO);
    }

    #[test]
    fn rto_before_any_sample_is_the_initial_value() {
        let rtt = RttEstimator::new();
        assert_eq!(rtt.rto(), INITIAL_RTO);
    }
}
