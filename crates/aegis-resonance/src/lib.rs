//! Aegis Resonance
//!
//! Long-horizon stability tracking for a single node.
//!
//! # Memory Resonance Window
//!
//! A fixed-capacity FIFO of hourly TRSI samples. One week of hourly samples
//! (168) is the default horizon:
//!
//! ```text
//! stability = clamp(mean − stdev, 0, 1)
//! ```
//!
//! The subtraction fails toward zero under volatility even when the mean is
//! good. Near-zero stability means "insufficient evidence of long-term
//! coherence", not "broken".
//!
//! # Resonance Integrity Score
//!
//! ```text
//! RIS = ∛(stability × compliance × (1 − latency_penalty))
//! ```
//!
//! A geometric mean is fail-closed: any single dimension at zero forces the
//! whole score to zero, where an arithmetic mean would hide it.

mod error;
mod integrity;
mod window;

pub use error::{Error, Result};
pub use integrity::{
    compliance, compute_ris, latency_penalty, LatencyMode, RisBreakdown, LATENCY_CEILING_HOURS,
    LATENCY_GRACE_HOURS,
};
pub use window::{
    MemoryResonanceWindow, Stability, DEFAULT_MIN_SAMPLES, DEFAULT_WINDOW_CAPACITY,
    NEUTRAL_STABILITY,
};
