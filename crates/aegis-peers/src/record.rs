//! Peer records, wire summaries and read-only snapshots.

use std::collections::HashSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Quality assigned to a peer before any evidence exists.
pub const INITIAL_QUALITY: f64 = 0.5;

/// Current wall-clock time in unix milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// What a peer reports about itself on the liveness/summary endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSummary {
    /// The peer's id (double-BLAKE3 of its public key).
    pub peer_id: String,
    /// Hex ed25519 public key the peer id derives from.
    pub public_key: String,
    /// Number of entries in the peer's ledger.
    pub ledger_height: u64,
    /// Hex hash of the peer's latest ledger entry.
    pub chain_tip: String,
    /// Peer's clock at the time of the reply (unix millis).
    pub timestamp: u64,
}

/// Everything this node knows about one peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub id: String,
    pub address: String,
    /// Last successful contact (unix millis).
    pub last_seen: u64,
    /// Exponential moving average of per-call success, in [0, 1].
    pub quality: f64,
    /// Lifetime successes / attempts, in [0, 1].
    pub success_rate: f64,
    /// Delay before the next attempt while the peer is failing.
    pub backoff: Duration,
    pub consecutive_failures: u32,
    /// Stale peers are excluded from snapshots but kept for audit.
    pub stale: bool,
    pub ledger_height: u64,
    pub chain_tip: String,
    pub attempts: u64,
    pub successes: u64,
}

impl PeerRecord {
    /// Create a record from a peer's first successful summary.
    pub fn from_summary(address: &str, summary: &PeerSummary, now: u64, backoff: Duration) -> Self {
        Self {
            id: summary.peer_id.clone(),
            address: address.to_string(),
            last_seen: now,
            quality: INITIAL_QUALITY,
            success_rate: 0.0,
            backoff,
            consecutive_failures: 0,
            stale: false,
            ledger_height: summary.ledger_height,
            chain_tip: summary.chain_tip.clone(),
            attempts: 0,
            successes: 0,
        }
    }

    /// Fold one call outcome into quality and success rate.
    pub(crate) fn observe(&mut self, success: bool, alpha: f64) {
        let indicator = if success { 1.0 } else { 0.0 };
        self.quality = (alpha * indicator + (1.0 - alpha) * self.quality).clamp(0.0, 1.0);
        self.attempts += 1;
        if success {
            self.successes += 1;
        }
        self.success_rate = self.successes as f64 / self.attempts as f64;
    }

    /// Milliseconds since the peer was last seen.
    pub fn silence_ms(&self, now: u64) -> u64 {
        now.saturating_sub(self.last_seen)
    }
}

/// Read-only copy of the live peers at one instant.
///
/// Snapshots are owned values: a concurrent sync can never tear a read
/// that is already in progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerSnapshot {
    peers: Vec<PeerRecord>,
    taken_at: u64,
}

impl PeerSnapshot {
    /// Build a snapshot from records, dropping stale ones and sorting by id.
    pub fn from_records(records: impl IntoIterator<Item = PeerRecord>, taken_at: u64) -> Self {
        let mut peers: Vec<PeerRecord> = records.into_iter().filter(|p| !p.stale).collect();
        peers.sort_by(|a, b| a.id.cmp(&b.id));
        Self { peers, taken_at }
    }

    pub fn peers(&self) -> &[PeerRecord] {
        &self.peers
    }

    pub fn live_count(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn taken_at(&self) -> u64 {
        self.taken_at
    }

    /// Number of different chain tips reported by live peers.
    pub fn distinct_tips(&self) -> usize {
        self.peers
            .iter()
            .map(|p| p.chain_tip.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Mean quality of live peers (0 when there are none).
    pub fn mean_quality(&self) -> f64 {
        if self.peers.is_empty() {
            return 0.0;
        }
        self.peers.iter().map(|p| p.quality).sum::<f64>() / self.peers.len() as f64
    }

    /// Age in hours of the most recently seen live peer, if any.
    pub fn freshest_contact_hours(&self, now: u64) -> Option<f64> {
        self.peers
            .iter()
            .map(|p| p.silence_ms(now))
            .min()
            .map(|ms| ms as f64 / 3_600_000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, tip: &str, quality: f64, stale: bool) -> PeerRecord {
        let summary = PeerSummary {
            peer_id: id.into(),
            public_key: String::new(),
            ledger_height: 1,
            chain_tip: tip.into(),
            timestamp: 0,
        };
        let mut r = PeerRecord::from_summary("127.0.0.1:1", &summary, 1_000, Duration::from_secs(1));
        r.quality = quality;
        r.stale = stale;
        r
    }

    #[test]
    fn ema_moves_toward_indicator() {
        let mut r = record("a", "t", 0.5, false);
        r.observe(true, 0.5);
        assert!((r.quality - 0.75).abs() < 1e-12);
        r.observe(false, 0.5);
        assert!((r.quality - 0.375).abs() < 1e-12);
        assert_eq!(r.attempts, 2);
        assert_eq!(r.success_rate, 0.5);
    }

    #[test]
    fn snapshot_excludes_stale_and_is_sorted() {
        let snap = PeerSnapshot::from_records(
            vec![
                record("c", "t1", 0.9, false),
                record("a", "t1", 0.5, false),
                record("b", "t2", 0.1, true),
            ],
            5,
        );
        let ids: Vec<&str> = snap.peers().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(snap.distinct_tips(), 1);
        assert!((snap.mean_quality() - 0.7).abs() < 1e-12);
        assert_eq!(snap.taken_at(), 5);
    }

    #[test]
    fn empty_snapshot() {
        let snap = PeerSnapshot::default();
        assert!(snap.is_empty());
        assert_eq!(snap.mean_quality(), 0.0);
        assert_eq!(snap.freshest_contact_hours(10), None);
    }
}
