//! Governor tuning.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Time between ticks.
    pub tick_interval: Duration,
    /// Proportional gain κ.
    pub kappa: f64,
    /// Target generativity G0.
    pub target: f64,
    pub eta_initial: f64,
    pub eta_min: f64,
    pub eta_max: f64,
    /// Gate is open while G* ≥ this.
    pub gate_threshold: f64,
    /// Weight of Progress × Consistency.
    pub local_weight: f64,
    /// Weight of Novelty.
    pub federated_weight: f64,
    /// How strongly the last-tick trend moves Progress.
    pub trend_gain: f64,
    /// Number of recent η values used for Consistency.
    pub eta_history: usize,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
            kappa: 0.5,
            target: 0.6,
            eta_initial: 0.5,
            eta_min: 0.05,
            eta_max: 1.0,
            gate_threshold: 0.5,
            local_weight: 0.7,
            federated_weight: 0.3,
            trend_gain: 0.5,
            eta_history: 16,
        }
    }
}

impl GovernorConfig {
    pub fn validate(&self) -> Result<()> {
        let unit = |name: &str, v: f64| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(Error::InvalidConfig(format!("{} = {} outside [0, 1]", name, v)))
            }
        };

        if self.tick_interval.is_zero() {
            return Err(Error::InvalidConfig("tick_interval must be positive".into()));
        }
        if !(self.kappa.is_finite() && self.kappa >= 0.0) {
            return Err(Error::InvalidConfig(format!("kappa = {} must be non-negative", self.kappa)));
        }
        unit("target", self.target)?;
        unit("gate_threshold", self.gate_threshold)?;
        unit("local_weight", self.local_weight)?;
        unit("federated_weight", self.federated_weight)?;
        if ((self.local_weight + self.federated_weight) - 1.0).abs() > 1e-9 {
            return Err(Error::InvalidConfig(format!(
                "local_weight + federated_weight = {} must equal 1",
                self.local_weight + self.federated_weight
            )));
        }
        if !(self.eta_min < self.eta_max) {
            return Err(Error::InvalidConfig(format!(
                "eta_min {} must be below eta_max {}",
                self.eta_min, self.eta_max
            )));
        }
        if !(self.eta_min..=self.eta_max).contains(&self.eta_initial) {
            return Err(Error::InvalidConfig(format!(
                "eta_initial {} outside [{}, {}]",
                self.eta_initial, self.eta_min, self.eta_max
            )));
        }
        if !(self.trend_gain.is_finite() && self.trend_gain >= 0.0) {
            return Err(Error::InvalidConfig("trend_gain must be non-negative".into()));
        }
        if self.eta_history < 2 {
            return Err(Error::InvalidConfig("eta_history must hold at least 2 values".into()));
        }
        Ok(())
    }
}
