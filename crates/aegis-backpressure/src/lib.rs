//! Aegis Backpressure - admission control under load.
//!
//! # State Machine
//!
//! ```text
//!            pressure > soft                 hard × N ticks | critical
//!   NORMAL ─────────────────▶ THROTTLED ──────────────────────────▶ BREAKER_OPEN
//!     ▲  ◀───────────────────                                          │   ▲
//!     │     pressure ≤ soft                               cool-down    │   │ probe failed /
//!     │                                                                ▼   │ window expired
//!     └────────────────────────── M probe successes ─────────────── RECOVERING
//! ```
//!
//! NORMAL can also go straight to BREAKER_OPEN on N hard ticks or a
//! critical signal. While open, every admission is rejected with
//! [`BlockReason::BreakerOpen`]. While recovering, only a limited probe
//! budget is admitted.
//!
//! State enum, concurrency limit and job counters share one mutex, so the
//! tick loop and request-path callers never observe a half-applied change.

mod admission;
mod breaker;
mod config;
mod error;
mod state;

pub use admission::{AdmissionControl, AdmissionTicket, JobOutcome, OpenAdmission};
pub use breaker::{BackpressureGovernor, PressureInputs};
pub use config::BackpressureConfig;
pub use error::{BlockReason, Error, Rejection, Result};
pub use state::{BreakerState, PressureSignal, PressureState, PressureTransition, TransitionReason};
