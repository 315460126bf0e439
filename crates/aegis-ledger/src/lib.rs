//! Aegis Ledger - append-only, hash-chained anchor store.
//!
//! Anchors are immutable `(id, value)` facts. Registering one appends a
//! [`LedgerEntry`] whose hash commits to the previous entry, so any edit to
//! history shows up in [`Ledger::verify_chain`]. Stored anchor values can be
//! checked against their attestation and restored from a backup anchor.
//!
//! ```text
//!   entry 0            entry 1            entry 2
//!  ┌──────────┐       ┌──────────┐       ┌──────────┐
//!  │ prev: 00 │   ┌──▶│ prev: h0 │   ┌──▶│ prev: h1 │
//!  │ payload  │   │   │ payload  │   │   │ payload  │
//!  │ hash: h0 │───┘   │ hash: h1 │───┘   │ hash: h2 │
//!  └──────────┘       └──────────┘       └──────────┘
//! ```

mod anchor;
mod chain;
mod entry;
mod error;
mod ledger;
mod store;

pub use anchor::{generate_anchor_id, AnchorRecord, RecoveryOutcome, Registration, Verification, BACKUP_REF_KEY};
pub use chain::{verify_entries, verify_slots, ChainReport};
pub use entry::{payload_hash, EntrySignature, EntrySigner, LedgerEntry, GENESIS_PREV_HASH};
pub use error::{Error, Result};
pub use ledger::{Ledger, LedgerStats};
pub use store::{LedgerBackend, LedgerStore, MemoryStore, RocksStore};
