//! Aegis Governor - the wisdom/trust control loop.
//!
//! Each tick reads a [`PeerSnapshot`](aegis_peers::PeerSnapshot) and local
//! [`Telemetry`] and produces a new [`GovernorState`]:
//!
//! ```text
//! Progress    = clamp(outcome + g·(outcome − previous outcome), 0, 1)
//! Novelty     = 0                                  if no live peers
//!             = distinct tips / live peers × mean quality
//! Consistency = 1 − clamp(2·stdev(recent η) / (η_max − η_min), 0, 1)
//!
//! G* = w_local · Progress · Consistency + w_fed · Novelty
//! η' = clamp(η + κ·(G0 − G*), η_min, η_max)
//! ```
//!
//! A lone node has Novelty = 0, so its G* is capped at
//! `w_local · Progress · Consistency`: it cannot claim federation-derived
//! generativity.
//!
//! The η update is a discrete proportional step. There is no integral or
//! derivative term.
//!
//! Scoring is a pure function of its inputs so independent nodes fed the
//! same snapshot reach the same conclusion.

mod config;
mod error;
mod gate;
mod governor;
mod state;

pub use config::GovernorConfig;
pub use error::{Error, Result};
pub use gate::{AlwaysOpen, GateSignal, GateSource};
pub use governor::{evaluate, Governor, TelemetrySource};
pub use state::{Components, GovernorState, Telemetry};
