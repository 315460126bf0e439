//! Governance signals exported by the node.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use aegis_backpressure::{BlockReason, BreakerState, PressureState};
use aegis_governor::GovernorState;
use aegis_ledger::{ChainReport, LedgerStats};
use serde::{Deserialize, Serialize};

/// f64 stored as bits.
#[derive(Debug, Default)]
pub(crate) struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub(crate) fn new(v: f64) -> Self {
        Self(AtomicU64::new(v.to_bits()))
    }

    pub(crate) fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub(crate) fn store(&self, v: f64) {
        self.0.store(v.to_bits(), Ordering::Relaxed)
    }
}

/// Live metric values, updated by the control loops.
#[derive(Debug)]
pub struct NodeMetrics {
    peer_count: AtomicU64,
    stale_peer_count: AtomicU64,
    novelty: AtomicF64,
    stability: AtomicF64,
    ris: AtomicF64,
    generativity: AtomicF64,
    eta: AtomicF64,
    trust: AtomicF64,
    gate_open: AtomicBool,
    backpressure_jobs: AtomicU64,
    backpressure_state: Mutex<Option<BreakerState>>,
    backpressure_block_reason: Mutex<Option<BlockReason>>,
    ledger_height: AtomicU64,
    chain_continuity: AtomicF64,
    anchor_attestations_ok: AtomicU64,
    anchor_attestations_failed: AtomicU64,
    verification_mismatches: AtomicU64,
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self {
            peer_count: AtomicU64::new(0),
            stale_peer_count: AtomicU64::new(0),
            novelty: AtomicF64::default(),
            stability: AtomicF64::default(),
            ris: AtomicF64::default(),
            generativity: AtomicF64::default(),
            eta: AtomicF64::default(),
            trust: AtomicF64::default(),
            gate_open: AtomicBool::new(false),
            backpressure_jobs: AtomicU64::new(0),
            backpressure_state: Mutex::new(None),
            backpressure_block_reason: Mutex::new(None),
            ledger_height: AtomicU64::new(0),
            chain_continuity: AtomicF64::new(1.0),
            anchor_attestations_ok: AtomicU64::new(0),
            anchor_attestations_failed: AtomicU64::new(0),
            verification_mismatches: AtomicU64::new(0),
        }
    }
}

/// Point-in-time copy of [`NodeMetrics`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub peer_count: u64,
    pub stale_peer_count: u64,
    pub novelty: f64,
    pub stability: f64,
    pub ris: f64,
    pub generativity: f64,
    pub eta: f64,
    pub trust: f64,
    pub gate_open: bool,
    pub backpressure_jobs: u64,
    pub backpressure_state: Option<BreakerState>,
    pub backpressure_block_reason: Option<BlockReason>,
    pub ledger_height: u64,
    pub chain_continuity: f64,
    pub anchor_attestations_ok: u64,
    pub anchor_attestations_failed: u64,
    pub verification_mismatches: u64,
}

impl NodeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_peers(&self, live: usize, stale: usize) {
        self.peer_count.store(live as u64, Ordering::Relaxed);
        self.stale_peer_count.store(stale as u64, Ordering::Relaxed);
    }

    pub fn record_stability(&self, stability: f64) {
        self.stability.store(stability);
    }

    pub fn record_governor(&self, state: &GovernorState) {
        self.novelty.store(state.components.novelty);
        self.generativity.store(state.g_star);
        self.eta.store(state.eta);
        self.ris.store(state.ris);
        self.trust.store(state.trust);
        self.gate_open.store(state.gate_open, Ordering::Relaxed);
    }

    pub fn record_backpressure(&self, state: &PressureState) {
        self.backpressure_jobs.store(state.in_flight as u64, Ordering::Relaxed);
        *self.backpressure_state.lock().unwrap_or_else(PoisonError::into_inner) = Some(state.state);
        *self
            .backpressure_block_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = state.last_block;
    }

    pub fn record_ledger(&self, stats: &LedgerStats) {
        self.ledger_height.store(stats.height, Ordering::Relaxed);
        self.anchor_attestations_ok.store(stats.attestations_ok, Ordering::Relaxed);
        self.anchor_attestations_failed
            .store(stats.attestations_failed, Ordering::Relaxed);
        self.verification_mismatches
            .store(stats.verification_mismatches, Ordering::Relaxed);
    }

    pub fn record_chain(&self, report: &ChainReport) {
        self.chain_continuity.store(report.continuity);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            peer_count: self.peer_count.load(Ordering::Relaxed),
            stale_peer_count: self.stale_peer_count.load(Ordering::Relaxed),
            novelty: self.novelty.load(),
            stability: self.stability.load(),
            ris: self.ris.load(),
            generativity: self.generativity.load(),
            eta: self.eta.load(),
            trust: self.trust.load(),
            gate_open: self.gate_open.load(Ordering::Relaxed),
            backpressure_jobs: self.backpressure_jobs.load(Ordering::Relaxed),
            backpressure_state: *self.backpressure_state.lock().unwrap_or_else(PoisonError::into_inner),
            backpressure_block_reason: *self
                .backpressure_block_reason
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
            ledger_height: self.ledger_height.load(Ordering::Relaxed),
            chain_continuity: self.chain_continuity.load(),
            anchor_attestations_ok: self.anchor_attestations_ok.load(Ordering::Relaxed),
            anchor_attestations_failed: self.anchor_attestations_failed.load(Ordering::Relaxed),
            verification_mismatches: self.verification_mismatches.load(Ordering::Relaxed),
        }
    }
}
