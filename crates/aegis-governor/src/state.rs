//! Governor state and inputs.

use std::collections::VecDeque;

use aegis_resonance::RisBreakdown;
use serde::{Deserialize, Serialize};

use crate::config::GovernorConfig;

/// Local signals fed to each tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    /// Fraction of recent work that succeeded, in [0, 1].
    pub outcome_score: f64,
    /// Resonance integrity, used to weight trust.
    pub ris: RisBreakdown,
}

/// The three normalized generativity components.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Components {
    pub progress: f64,
    pub novelty: f64,
    pub consistency: f64,
}

/// Output of the latest governor tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernorState {
    /// Composite generativity G*.
    pub g_star: f64,
    pub components: Components,
    /// Control signal η.
    pub eta: f64,
    /// Resonance integrity score seen on the last tick.
    pub ris: f64,
    /// G* weighted by resonance integrity.
    pub trust: f64,
    pub gate_open: bool,
    pub live_peers: usize,
    /// Outcome score from the previous tick, for the Progress trend.
    pub last_outcome: Option<f64>,
    /// Recent η values, oldest first.
    pub eta_history: VecDeque<f64>,
    /// Unix millis of the last tick (0 before the first).
    pub updated_at: u64,
    pub ticks: u64,
}

impl GovernorState {
    /// State before the first tick.
    pub fn initial(config: &GovernorConfig) -> Self {
        let mut eta_history = VecDeque::with_capacity(config.eta_history);
        eta_history.push_back(config.eta_initial);
        Self {
            g_star: 0.0,
            components: Components::default(),
            eta: config.eta_initial,
            ris: 0.0,
            trust: 0.0,
            gate_open: false,
            live_peers: 0,
            last_outcome: None,
            eta_history,
            updated_at: 0,
            ticks: 0,
        }
    }
}
