//! Gate signals consumed by downstream collaborators.

use serde::{Deserialize, Serialize};

/// Latest gate position and the trust figure behind it.
///
/// Published on a `watch` channel. Receivers are notified only when the gate
/// crosses the threshold; `trust` and `g_star` are refreshed silently on
/// every tick and can be read with `borrow()`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GateSignal {
    pub open: bool,
    pub g_star: f64,
    pub trust: f64,
    pub threshold: f64,
    /// Unix millis of the tick that produced this value.
    pub at: u64,
}

impl GateSignal {
    pub fn closed(threshold: f64) -> Self {
        Self {
            open: false,
            g_star: 0.0,
            trust: 0.0,
            threshold,
            at: 0,
        }
    }
}

/// Read side of the trust gate.
pub trait GateSource: Send + Sync {
    /// Whether G* is currently at or above the gate threshold.
    fn is_open(&self) -> bool;

    /// Trust in [0, 1] used to weight admission pressure.
    fn trust(&self) -> f64;
}

/// Gate used when the governor subsystem is disabled: always open, full trust.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOpen;

impl GateSource for AlwaysOpen {
    fn is_open(&self) -> bool {
        true
    }

    fn trust(&self) -> f64 {
        1.0
    }
}
