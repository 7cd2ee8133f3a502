//! Connection configuration: a chained-builder `ConnectionConfig` over a
//! `Default` impl, `assert!`-checked at each call site for the literal
//! misuses (zero MSS, zero timeout), plus a final `validate()` pass that
//! turns any remaining inconsistency into `Error::ConfigInvalid` rather than
//! a panic, since configuration here can arrive from outside the process
//! (a config file, a parsed algorithm name) rather than only from call
//! sites fixed at compile time.

use crate::congestion::{Algorithm, CubicParams};
use crate::constants::{
    DEFAULT_KEEPALIVE, DEFAULT_TIMEOUT, DEFAULT_WINDOW_SIZE, MAX_RETRANSMISSIONS, MSS,
};
use crate::error::{Error, Result};
use std::time::Duration;

/// Re-exported here so callers don't need to reach into `congestion`
/// directly just to build a `ConnectionConfig`.
pub use crate::congestion::Algorithm as CongestionAlgorithm;
pub use crate::congestion::CubicParams as CongestionParams;

#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    pub mss: u32,
    pub window_size: u32,
    pub timeout: Duration,
    pub keepalive_interval: Duration,
    pub max_retransmissions: u32,
    pub congestion_algorithm: Option<CongestionAlgorithm>,
    pub congestion_params: CongestionParams,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            mss: MSS as u32,
            window_size: DEFAULT_WINDOW_SIZE,
            timeout: DEFAULT_TIMEOUT,
            keepalive_interval: DEFAULT_KEEPALIVE,
            max_retransmissions: MAX_RETRANSMISSIONS,
            congestion_algorithm: None,
            congestion_params: CongestionParams::default(),
        }
    }
}

impl ConnectionConfig {
    pub fn mss(mut self, value: u32) -> Self {
        assert!(value > 0);
        self.mss = value;
        self
    }

    pub fn window_size(mut self, value: u32) -> Self {
        assert!(value > 0);
        self.window_size = value;
        self
    }

    pub fn timeout(mut self, value: Duration) -> Self {
        assert!(value > Duration::new(0, 0));
        self.timeout = value;
        self
    }

    pub fn keepalive_interval(mut self, value: Duration) -> Self {
        assert!(value > Duration::new(0, 0));
        self.keepalive_interval = value;
        self
    }

    pub fn max_retransmissions(mut self, value: u32) -> Self {
        assert!(value > 0);
        self.max_retransmissions = value;
        self
    }

    pub fn congestion_algorithm(mut self, value: Option<CongestionAlgorithm>) -> Self {
        self.congestion_algorithm = value;
        self
    }

    /// Accepts the controller name the way it would arrive from an external
    /// source (a config file, a CLI flag, a peer capability exchange): the
    /// empty string selects the embedded default, and any other unrecognized
    /// name is rejected immediately rather than silently falling back to it.
    pub fn congestion_algorithm_name(mut self, name: &str) -> Result<Self> {
        match CongestionAlgorithm::parse(name) {
            Some(algorithm) => {
                self.congestion_algorithm = algorithm;
                Ok(self)
            }
            None => Err(Error::ConfigInvalid {
                details: format!("unrecognized congestion algorithm: {name:?}"),
            }),
        }
    }

    pub fn congestion_params(mut self, value: CongestionParams) -> Self {
        self.congestion_params = value;
        self
    }

    /// Catches the inconsistencies that arrive at runtime (e.g. from a
    /// parsed algorithm name) rather than at a fixed call site, where the
    /// builder's own `assert!`s already guard against malformed literals.
    pub fn validate(&self) -> Result<()> {
        if self.mss == 0 {
            return Err(Error::ConfigInvalid {
                details: "mss must be non-zero".into(),
            });
        }
        if self.window_size < 2 * self.mss {
            return Err(Error::ConfigInvalid {
                details: format!(
                    "window_size ({}) must be at least 2*mss ({})",
                    self.window_size,
                    2 * self.mss
                ),
            });
        }
        if self.congestion_params.beta <= 0.0 || self.congestion_params.beta >= 1.0 {
            return Err(Error::ConfigInvalid {
                details: format!(
                    "cubic beta ({}) must fall in (0, 1)",
                    self.congestion_params.beta
                ),
            });
        }
        if self.congestion_params.c <= 0.0 {
            return Err(Error::ConfigInvalid {
                details: format!("cubic c ({}) must be positive", self.congestion_params.c),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = ConnectionConfig::default();
        assert_eq!(config.window_size, DEFAULT_WINDOW_SIZE);
        assert_eq!(config.max_retransmissions, MAX_RETRANSMISSIONS);
        assert!(config.congestion_algorithm.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn congestion_algorithm_name_accepts_known_variants() {
        let config = ConnectionConfig::default()
            .congestion_algorithm_name("cubic")
            .unwrap();
        assert_eq!(config.congestion_algorithm, Some(Algorithm::Cubic));

        let embedded_default = ConnectionConfig::default().congestion_algorithm_name("").unwrap();
        assert!(embedded_default.congestion_algorithm.is_none());
    }

    #[test]
    fn unknown_congestion_algorithm_name_is_rejected() {
        let result = ConnectionConfig::default().congestion_algorithm_name("vegas-turbo");
        assert!(matches!(result, Err(Error::ConfigInvalid { .. })));
    }

    #[test]
    fn window_smaller_than_two_mss_is_rejected() {
        let config = ConnectionConfig::default().mss(1000).window_size(500);
        assert!(matches!(config.validate(), Err(Error::ConfigInvalid { .. })));
    }

    #[test]
    fn out_of_range_cubic_beta_is_rejected() {
        let config = ConnectionConfig::default()
            .congestion_algorithm(Some(Algorithm::Cubic))
            .congestion_params(CongestionParams { beta: 1.5, c: 0.4 });
        assert!(matches!(config.validate(), Err(Error::ConfigInvalid { .. })));
    }

    #[test]
    fn builder_chains_reconfigure_every_field() {
        let config = ConnectionConfig::default()
            .mss(500)
            .window_size(4000)
            .timeout(Duration::from_secs(5))
            .keepalive_interval(Duration::from_secs(2))
            .max_retransmissions(3)
            .congestion_algorithm(Some(Algorithm::Vegas));
        assert_eq!(config.mss, 500);
        assert_eq!(config.max_retransmissions, 3);
        assert_eq!(config.congestion_algorithm, Some(Algorithm::Vegas));
        assert!(config.validate().is_ok());
    }
}
