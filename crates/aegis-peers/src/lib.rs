//! Aegis Peers - federation membership for the governance plane.
//!
//! # Architecture
//!
//! ```text
//!  peer A ◀── summary_request ──┐
//!  peer B ◀── summary_request ──┤  Synchronizer (one task per address,
//!  peer C ◀── summary_request ──┘   jittered interval / backoff)
//!                                        │ record_success / record_failure
//!                                        ▼
//!                                    PeerStore ──▶ snapshot() ──▶ Governor
//! ```
//!
//! - **PeerStore**: peer-id → [`PeerRecord`]. Written only by the
//!   [`Synchronizer`]; everyone else reads copies via [`PeerStore::snapshot`].
//! - **Synchronizer**: contacts peers through a [`SummaryClient`] with a
//!   bounded timeout. Failures back off exponentially and are never fatal.
//! - **Wire**: newline-delimited JSON over TCP ([`TcpSummaryClient`],
//!   [`serve_summaries`]).
//!
//! Peers that go silent or fail too often are marked stale, never removed,
//! so they stay visible for audit.

pub mod error;
pub mod identity;
pub mod record;
pub mod store;
pub mod sync;
pub mod wire;

pub use error::{Error, Result};
pub use identity::{check_peer_id, compute_peer_id, encode_public_key};
pub use record::{now_millis, PeerRecord, PeerSnapshot, PeerSummary};
pub use store::PeerStore;
pub use sync::{SummaryClient, SyncConfig, Synchronizer};
pub use wire::{serve_summaries, SummaryProvider, TcpSummaryClient, WireMessage};
