//! Rejections and configuration errors.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::BreakerState;

/// Result type for backpressure configuration.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq)]
pub enum Error {
    #[error("invalid backpressure configuration: {0}")]
    InvalidConfig(String),
}

/// Why an admission request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    /// The breaker is open; no work is admitted until the cool-down ends.
    BreakerOpen,
    /// In-flight jobs already at the current concurrency limit.
    ConcurrencyLimit,
    /// Recovering, and every probe slot is already used.
    ProbeBudgetExhausted,
}

impl BlockReason {
    /// Stable reason code for callers and metrics.
    pub fn code(&self) -> &'static str {
        match self {
            BlockReason::BreakerOpen => "breaker_open",
            BlockReason::ConcurrencyLimit => "concurrency_limit",
            BlockReason::ProbeBudgetExhausted => "probe_budget_exhausted",
        }
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A refused admission. Callers must back off or queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("admission rejected ({reason}) in state {state}")]
pub struct Rejection {
    pub reason: BlockReason,
    pub state: BreakerState,
    /// Remaining cool-down when the breaker is open.
    pub retry_after: Option<Duration>,
}
