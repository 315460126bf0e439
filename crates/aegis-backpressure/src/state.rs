//! Breaker states, pressure inputs and transition events.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::BlockReason;

/// Position of the admission state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Normal,
    Throttled,
    BreakerOpen,
    Recovering,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerState::Normal => write!(f, "NORMAL"),
            BreakerState::Throttled => write!(f, "THROTTLED"),
            BreakerState::BreakerOpen => write!(f, "BREAKER_OPEN"),
            BreakerState::Recovering => write!(f, "RECOVERING"),
        }
    }
}

/// Raw load indicators, each normalized to [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PressureSignal {
    /// Queue depth relative to capacity.
    pub queue_depth: f64,
    pub error_rate: f64,
    /// CPU/memory/disk saturation, whichever is worst.
    pub saturation: f64,
    /// Opens the breaker immediately.
    pub critical: bool,
}

impl PressureSignal {
    /// Worst raw indicator plus a penalty for low trust, clamped to [0, 1].
    pub fn pressure(&self, trust: f64, trust_weight: f64) -> f64 {
        let unit = |v: f64| if v.is_nan() { 1.0 } else { v.clamp(0.0, 1.0) };
        let raw = unit(self.queue_depth)
            .max(unit(self.error_rate))
            .max(unit(self.saturation));
        let distrust = 1.0 - if trust.is_nan() { 0.0 } else { trust.clamp(0.0, 1.0) };
        (raw + trust_weight * distrust).clamp(0.0, 1.0)
    }
}

/// Why the machine moved.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionReason {
    Initial,
    SoftThresholdExceeded { pressure: f64 },
    PressureRelieved { pressure: f64 },
    SustainedHardPressure { ticks: u32 },
    CriticalSignal,
    CooldownElapsed,
    ProbesSucceeded { count: u32 },
    ProbeFailed,
    ProbeWindowExpired,
}

impl fmt::Display for TransitionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionReason::Initial => write!(f, "initial"),
            TransitionReason::SoftThresholdExceeded { pressure } => {
                write!(f, "pressure {:.3} above soft threshold", pressure)
            }
            TransitionReason::PressureRelieved { pressure } => {
                write!(f, "pressure {:.3} back under soft threshold", pressure)
            }
            TransitionReason::SustainedHardPressure { ticks } => {
                write!(f, "{} consecutive ticks above hard threshold", ticks)
            }
            TransitionReason::CriticalSignal => write!(f, "critical pressure signal"),
            TransitionReason::CooldownElapsed => write!(f, "cool-down elapsed"),
            TransitionReason::ProbesSucceeded { count } => write!(f, "{} probes succeeded", count),
            TransitionReason::ProbeFailed => write!(f, "probe failed"),
            TransitionReason::ProbeWindowExpired => write!(f, "probe window expired"),
        }
    }
}

/// Event published on every state change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PressureTransition {
    pub from: BreakerState,
    pub to: BreakerState,
    pub reason: TransitionReason,
    /// Unix millis.
    pub at: u64,
}

/// Consistent copy of the admission state and counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PressureState {
    pub state: BreakerState,
    pub concurrency_limit: usize,
    pub in_flight: usize,
    pub last_reason: TransitionReason,
    pub pressure: f64,
    pub hard_streak: u32,
    pub probes_admitted: u32,
    pub probe_streak: u32,
    pub admitted: u64,
    pub rejected: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub last_block: Option<BlockReason>,
}
