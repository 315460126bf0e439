//! Breaker thresholds and limits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackpressureConfig {
    pub tick_interval: Duration,
    /// Concurrency limit in NORMAL.
    pub base_limit: usize,
    /// Throttling never drops the limit below this.
    pub min_limit: usize,
    pub soft_threshold: f64,
    pub hard_threshold: f64,
    /// Consecutive ticks above `hard_threshold` that open the breaker.
    pub hard_ticks: u32,
    /// Time the breaker stays open before probing.
    pub cooldown: Duration,
    /// Probes admitted per recovery attempt.
    pub probe_budget: u32,
    /// Consecutive probe successes that close the breaker.
    pub probe_successes: u32,
    /// Recovery fails if the successes do not arrive within this window.
    pub probe_window: Duration,
    /// How much low governor trust adds to pressure.
    pub trust_weight: f64,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            base_limit: 64,
            min_limit: 1,
            soft_threshold: 0.6,
            hard_threshold: 0.85,
            hard_ticks: 5,
            cooldown: Duration::from_secs(30),
            probe_budget: 3,
            probe_successes: 3,
            probe_window: Duration::from_secs(60),
            trust_weight: 0.2,
        }
    }
}

impl BackpressureConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval.is_zero() {
            return Err(Error::InvalidConfig("tick_interval must be positive".into()));
        }
        if self.min_limit == 0 || self.min_limit > self.base_limit {
            return Err(Error::InvalidConfig(format!(
                "need 0 < min_limit ({}) <= base_limit ({})",
                self.min_limit, self.base_limit
            )));
        }
        if !(0.0 < self.soft_threshold && self.soft_threshold < self.hard_threshold && self.hard_threshold <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "need 0 < soft ({}) < hard ({}) <= 1",
                self.soft_threshold, self.hard_threshold
            )));
        }
        if self.hard_ticks == 0 || self.probe_successes == 0 {
            return Err(Error::InvalidConfig("hard_ticks and probe_successes must be positive".into()));
        }
        if self.probe_budget < self.probe_successes {
            return Err(Error::InvalidConfig(format!(
                "probe_budget ({}) cannot be below probe_successes ({})",
                self.probe_budget, self.probe_successes
            )));
        }
        if !(0.0..=1.0).contains(&self.trust_weight) {
            return Err(Error::InvalidConfig(format!("trust_weight {} outside [0, 1]", self.trust_weight)));
        }
        Ok(())
    }

    /// Concurrency limit for a throttled pressure level.
    pub fn throttled_limit(&self, pressure: f64) -> usize {
        let scaled = (self.base_limit as f64 * (1.0 - pressure.clamp(0.0, 1.0))).round() as usize;
        scaled.clamp(self.min_limit, self.base_limit)
    }
}
