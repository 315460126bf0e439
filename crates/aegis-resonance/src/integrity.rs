//! Resonance Integrity Score (RIS).
//!
//! The score combines three dimensions, each normalized to [0, 1]:
//! - stability from the [`MemoryResonanceWindow`](crate::MemoryResonanceWindow)
//! - compliance = checks passed / checks total
//! - latency headroom = 1 − latency penalty
//!
//! Latency penalty ramps linearly between the grace and ceiling bounds:
//!
//! ```text
//! hours:    0 ──── 2 ─────────────── 24 ────▶
//! penalty:  0      0 ── linear ──▶   1      1
//! ```

use serde::{Deserialize, Serialize};

/// Latency at or below this many hours carries no penalty.
pub const LATENCY_GRACE_HOURS: f64 = 2.0;

/// Latency at or above this many hours is fully penalized.
pub const LATENCY_CEILING_HOURS: f64 = 24.0;

/// How cross-node latency feeds the score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyMode {
    /// No cross-node latency measurement in this deployment; penalty fixed at 0.
    #[default]
    Disabled,
    /// Penalty derived from measured latency.
    Measured,
}

impl LatencyMode {
    /// Penalty for the given measurement under this mode.
    pub fn penalty(&self, latency_hours: f64) -> f64 {
        match self {
            LatencyMode::Disabled => 0.0,
            LatencyMode::Measured => latency_penalty(latency_hours),
        }
    }
}

/// Fraction of checks that passed; an empty check set is fully compliant.
pub fn compliance(checks_passed: u64, checks_total: u64) -> f64 {
    if checks_total == 0 {
        return 1.0;
    }
    (checks_passed as f64 / checks_total as f64).clamp(0.0, 1.0)
}

/// Linear latency penalty between the grace and ceiling bounds.
pub fn latency_penalty(latency_hours: f64) -> f64 {
    if latency_hours.is_nan() {
        return 1.0;
    }
    if latency_hours <= LATENCY_GRACE_HOURS {
        0.0
    } else if latency_hours >= LATENCY_CEILING_HOURS {
        1.0
    } else {
        (latency_hours - LATENCY_GRACE_HOURS) / (LATENCY_CEILING_HOURS - LATENCY_GRACE_HOURS)
    }
}

/// Geometric mean of stability, compliance and latency headroom.
///
/// Exactly zero whenever any component is zero.
pub fn compute_ris(stability: f64, checks_passed: u64, checks_total: u64, latency_hours: f64) -> f64 {
    RisBreakdown::new(stability, checks_passed, checks_total, latency_penalty(latency_hours)).score
}

/// The score together with the components that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RisBreakdown {
    pub stability: f64,
    pub compliance: f64,
    pub latency_penalty: f64,
    pub score: f64,
}

impl RisBreakdown {
    /// Build from an already-computed latency penalty.
    pub fn new(stability: f64, checks_passed: u64, checks_total: u64, latency_penalty: f64) -> Self {
        let stability = if stability.is_nan() { 0.0 } else { stability.clamp(0.0, 1.0) };
        let compliance = compliance(checks_passed, checks_total);
        let latency_penalty = if latency_penalty.is_nan() {
            1.0
        } else {
            latency_penalty.clamp(0.0, 1.0)
        };

        let product = stability * compliance * (1.0 - latency_penalty);
        Self {
            stability,
            compliance,
            latency_penalty,
            score: product.cbrt(),
        }
    }

    /// Build using a latency mode to decide the penalty.
    pub fn with_mode(
        stability: f64,
        checks_passed: u64,
        checks_total: u64,
        latency_hours: f64,
        mode: LatencyMode,
    ) -> Self {
        Self::new(stability, checks_passed, checks_total, mode.penalty(latency_hours))
    }
}
