//! Shared table of known peers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::record::{PeerRecord, PeerSnapshot, PeerSummary};

/// Peer-id → [`PeerRecord`] table.
///
/// Cloning the store clones the handle, not the table. Mutation is
/// crate-private: only the [`Synchronizer`](crate::Synchronizer) writes.
#[derive(Debug, Clone, Default)]
pub struct PeerStore {
    peers: Arc<RwLock<HashMap<String, PeerRecord>>>,
}

impl PeerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all live (non-stale) peers.
    pub async fn snapshot(&self) -> PeerSnapshot {
        let peers = self.peers.read().await;
        PeerSnapshot::from_records(peers.values().cloned(), crate::now_millis())
    }

    /// Copy of every record, stale ones included.
    pub async fn all(&self) -> Vec<PeerRecord> {
        let peers = self.peers.read().await;
        let mut all: Vec<PeerRecord> = peers.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub async fn get(&self, id: &str) -> Option<PeerRecord> {
        self.peers.read().await.get(id).cloned()
    }

    /// (live, stale) peer counts.
    pub async fn counts(&self) -> (usize, usize) {
        let peers = self.peers.read().await;
        let stale = peers.values().filter(|p| p.stale).count();
        (peers.len() - stale, stale)
    }

    /// Record a successful sync; creates the peer on first contact.
    pub(crate) async fn record_success(
        &self,
        address: &str,
        summary: &PeerSummary,
        now: u64,
        alpha: f64,
        base_backoff: Duration,
    ) {
        let mut peers = self.peers.write().await;
        let record = peers.entry(summary.peer_id.clone()).or_insert_with(|| {
            info!(peer_id = %summary.peer_id, address, "Discovered peer");
            PeerRecord::from_summary(address, summary, now, base_backoff)
        });

        if record.stale {
            info!(peer_id = %record.id, "Stale peer is live again");
        }
        record.observe(true, alpha);
        record.address = address.to_string();
        record.last_seen = now;
        record.backoff = base_backoff;
        record.consecutive_failures = 0;
        record.stale = false;
        record.ledger_height = summary.ledger_height;
        record.chain_tip = summary.chain_tip.clone();
    }

    /// Record a failed sync for a known peer. Returns true if the peer just
    /// became stale.
    pub(crate) async fn record_failure(
        &self,
        id: &str,
        alpha: f64,
        backoff: Duration,
        max_consecutive_failures: u32,
    ) -> bool {
        let mut peers = self.peers.write().await;
        let Some(record) = peers.get_mut(id) else {
            return false;
        };

        record.observe(false, alpha);
        record.backoff = backoff;
        record.consecutive_failures = record.consecutive_failures.saturating_add(1);

        if !record.stale && record.consecutive_failures >= max_consecutive_failures {
            record.stale = true;
            warn!(
                peer_id = %record.id,
                failures = record.consecutive_failures,
                "Peer marked stale after consecutive failures"
            );
            return true;
        }
        false
    }

    /// Mark peers silent for longer than `silence` as stale.
    pub(crate) async fn expire_silent(&self, now: u64, silence: Duration) -> usize {
        let silence_ms = silence.as_millis() as u64;
        let mut peers = self.peers.write().await;
        let mut expired = 0;
        for record in peers.values_mut().filter(|p| !p.stale) {
            if record.silence_ms(now) > silence_ms {
                record.stale = true;
                expired += 1;
                debug!(peer_id = %record.id, silent_ms = record.silence_ms(now), "Peer expired");
            }
        }
        expired
    }
}
