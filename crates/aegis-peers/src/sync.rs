//! Federation synchronizer: periodic, jittered contact with every peer.
//!
//! # Schedule
//!
//! ```text
//! success ──▶ wait interval × jitter
//! failure ──▶ wait backoff × jitter,  backoff = min(backoff × 2, ceiling)
//! ```
//!
//! Jitter is drawn uniformly from `[1 − j, 1 + j]` so nodes that restart
//! together do not hit their peers in lockstep.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::identity::check_peer_id;
use crate::record::{now_millis, PeerSummary};
use crate::store::PeerStore;

/// Fetches a [`PeerSummary`] from a peer address.
pub trait SummaryClient: Send + Sync + 'static {
    fn fetch_summary(&self, address: &str) -> impl Future<Output = Result<PeerSummary>> + Send;
}

/// Synchronizer tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Delay between successful syncs with the same peer.
    pub interval: Duration,
    /// Upper bound on a single summary fetch.
    pub timeout: Duration,
    /// First backoff step after a failure.
    pub backoff_base: Duration,
    /// Backoff never grows past this.
    pub backoff_ceiling: Duration,
    /// Relative jitter applied to every delay, in [0, 1).
    pub jitter: f64,
    /// EMA weight of the newest call outcome in the quality score.
    pub quality_alpha: f64,
    /// Consecutive failures before a peer is marked stale.
    pub max_consecutive_failures: u32,
    /// Silence after which a peer is marked stale.
    pub silence_period: Duration,
    /// How often the silence sweep runs.
    pub expiry_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            timeout: Duration::from_secs(3),
            backoff_base: Duration::from_secs(1),
            backoff_ceiling: Duration::from_secs(300),
            jitter: 0.2,
            quality_alpha: 0.2,
            max_consecutive_failures: 8,
            silence_period: Duration::from_secs(600),
            expiry_interval: Duration::from_secs(30),
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() || self.timeout.is_zero() {
            return Err(Error::Protocol("sync interval and timeout must be positive".into()));
        }
        if self.backoff_base.is_zero() || self.backoff_base > self.backoff_ceiling {
            return Err(Error::Protocol(
                "backoff_base must be positive and not exceed backoff_ceiling".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(Error::Protocol(format!("jitter {} outside [0, 1)", self.jitter)));
        }
        if !(self.quality_alpha > 0.0 && self.quality_alpha <= 1.0) {
            return Err(Error::Protocol(format!(
                "quality_alpha {} outside (0, 1]",
                self.quality_alpha
            )));
        }
        if self.max_consecutive_failures == 0 {
            return Err(Error::Protocol("max_consecutive_failures must be positive".into()));
        }
        Ok(())
    }
}

/// Per-address retry state, kept even before the peer id is known.
#[derive(Debug, Clone)]
struct LinkState {
    peer_id: Option<String>,
    backoff: Duration,
    consecutive_failures: u32,
}

/// Drives peer contact and is the only writer of the [`PeerStore`].
pub struct Synchronizer<C> {
    store: PeerStore,
    client: C,
    config: SyncConfig,
    links: Mutex<HashMap<String, LinkState>>,
}

impl<C: SummaryClient> Synchronizer<C> {
    pub fn new(store: PeerStore, client: C, config: SyncConfig) -> Self {
        Self {
            store,
            client,
            config,
            links: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &PeerStore {
        &self.store
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Contact one peer once and fold the outcome into the store.
    pub async fn sync_once(&self, address: &str) -> Result<PeerSummary> {
        let fetched = tokio::time::timeout(self.config.timeout, self.client.fetch_summary(address))
            .await
            .unwrap_or_else(|_| {
                Err(Error::Timeout {
                    address: address.to_string(),
                    after: self.config.timeout,
                })
            })
            .and_then(|summary| {
                check_peer_id(&summary.peer_id, &summary.public_key)?;
                Ok(summary)
            });

        match fetched {
            Ok(summary) => {
                self.update_link(address, |link| {
                    link.peer_id = Some(summary.peer_id.clone());
                    link.backoff = self.config.backoff_base;
                    link.consecutive_failures = 0;
                });
                self.store
                    .record_success(
                        address,
                        &summary,
                        now_millis(),
                        self.config.quality_alpha,
                        self.config.backoff_base,
                    )
                    .await;
                debug!(address, peer_id = %summary.peer_id, height = summary.ledger_height, "Peer sync ok");
                Ok(summary)
            }
            Err(e) => {
                let link = self.update_link(address, |link| {
                    link.backoff = if link.consecutive_failures == 0 {
                        self.config.backoff_base
                    } else {
                        (link.backoff * 2).min(self.config.backoff_ceiling)
                    };
                    link.consecutive_failures = link.consecutive_failures.saturating_add(1);
                });
                if let Some(peer_id) = &link.peer_id {
                    self.store
                        .record_failure(
                            peer_id,
                            self.config.quality_alpha,
                            link.backoff,
                            self.config.max_consecutive_failures,
                        )
                        .await;
                }
                warn!(
                    address,
                    error = %e,
                    failures = link.consecutive_failures,
                    backoff_ms = link.backoff.as_millis() as u64,
                    "Peer sync failed"
                );
                Err(e)
            }
        }
    }

    /// Delay before the next attempt for `address`, with jitter applied.
    pub fn next_delay(&self, address: &str) -> Duration {
        let base = {
            let links = self.links.lock().unwrap_or_else(PoisonError::into_inner);
            match links.get(address) {
                Some(link) if link.consecutive_failures > 0 => link.backoff,
                _ => self.config.interval,
            }
        };
        jittered(base, self.config.jitter)
    }

    /// Current backoff for an address (base backoff if never contacted).
    pub fn backoff_for(&self, address: &str) -> Duration {
        let links = self.links.lock().unwrap_or_else(PoisonError::into_inner);
        links
            .get(address)
            .map(|l| l.backoff)
            .unwrap_or(self.config.backoff_base)
    }

    fn update_link(&self, address: &str, f: impl FnOnce(&mut LinkState)) -> LinkState {
        let mut links = self.links.lock().unwrap_or_else(PoisonError::into_inner);
        let link = links.entry(address.to_string()).or_insert_with(|| LinkState {
            peer_id: None,
            backoff: self.config.backoff_base,
            consecutive_failures: 0,
        });
        f(link);
        link.clone()
    }

    /// Sync loop for one peer until shutdown.
    pub async fn run_peer(self: Arc<Self>, address: String, mut shutdown: watch::Receiver<bool>) {
        // Spread initial contact across the first interval.
        let initial = {
            let mut rng = rand::thread_rng();
            self.config.interval.mul_f64(rng.gen_range(0.0..=self.config.jitter.max(f64::EPSILON)))
        };
        tokio::select! {
            _ = tokio::time::sleep(initial) => {}
            _ = shutdown.changed() => return,
        }

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = self.sync_once(&address) => {}
                _ = shutdown.changed() => break,
            }
            let delay = self.next_delay(&address);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }
        debug!(address = %address, "Peer sync loop stopped");
    }

    /// Periodic silence sweep until shutdown.
    pub async fn run_expiry(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.expiry_interval) => {}
                _ = shutdown.changed() => break,
            }
            let expired = self
                .store
                .expire_silent(now_millis(), self.config.silence_period)
                .await;
            if expired > 0 {
                info!(expired, "Expired silent peers");
            }
        }
    }

    /// Spawn one sync task per address plus the expiry sweep.
    pub fn spawn(self: &Arc<Self>, addresses: &[String], shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles: Vec<JoinHandle<()>> = addresses
            .iter()
            .map(|address| {
                info!(address = %address, "Starting peer sync");
                tokio::spawn(Arc::clone(self).run_peer(address.clone(), shutdown.clone()))
            })
            .collect();
        handles.push(tokio::spawn(Arc::clone(self).run_expiry(shutdown)));
        handles
    }
}

/// Scale `base` by a uniform factor in `[1 − jitter, 1 + jitter]`.
pub(crate) fn jittered(base: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return base;
    }
    let factor = rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
    base.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{compute_peer_id, encode_public_key};
    use ed25519_dalek::{SigningKey, VerifyingKey};
    use proptest::prelude::*;
    use std::collections::VecDeque;

    /// Replays scripted outcomes; `None` sleeps past any timeout.
    struct ScriptedClient {
        script: Mutex<VecDeque<Option<Result<PeerSummary>>>>,
    }

    impl ScriptedClient {
        fn new(script: Vec<Option<Result<PeerSummary>>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
            }
        }
    }

    impl SummaryClient for ScriptedClient {
        fn fetch_summary(&self, address: &str) -> impl Future<Output = Result<PeerSummary>> + Send {
            let next = self.script.lock().unwrap().pop_front();
            let address = address.to_string();
            async move {
                match next {
                    Some(Some(result)) => result,
                    Some(None) => {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        Err(Error::Protocol("unreachable".into()))
                    }
                    None => Err(Error::Unreachable {
                        address,
                        reason: "script exhausted".into(),
                    }),
                }
            }
        }
    }

    fn key(seed: u8) -> VerifyingKey {
        SigningKey::from_bytes(&[seed; 32]).verifying_key()
    }

    fn id(seed: u8) -> String {
        compute_peer_id(&key(seed))
    }

    fn claim(peer_id: String, key: &VerifyingKey) -> Option<Result<PeerSummary>> {
        Some(Ok(PeerSummary {
            peer_id,
            public_key: encode_public_key(key),
            ledger_height: 7,
            chain_tip: "tip".into(),
            timestamp: 1,
        }))
    }

    fn ok(seed: u8) -> Option<Result<PeerSummary>> {
        claim(id(seed), &key(seed))
    }

    fn down() -> Option<Result<PeerSummary>> {
        Some(Err(Error::Unreachable {
            address: "x".into(),
            reason: "connection refused".into(),
        }))
    }

    fn config() -> SyncConfig {
        SyncConfig {
            interval: Duration::from_secs(10),
            timeout: Duration::from_millis(50),
            backoff_base: Duration::from_secs(1),
            backoff_ceiling: Duration::from_secs(4),
            jitter: 0.0,
            quality_alpha: 0.5,
            max_consecutive_failures: 3,
            ..SyncConfig::default()
        }
    }

    #[tokio::test]
    async fn success_populates_store() {
        let sync = Synchronizer::new(PeerStore::new(), ScriptedClient::new(vec![ok(1)]), config());
        let summary = sync.sync_once("a:1").await.unwrap();
        assert_eq!(summary.ledger_height, 7);

        let record = sync.store().get(&id(1)).await.unwrap();
        assert_eq!(record.address, "a:1");
        assert_eq!(record.ledger_height, 7);
        assert_eq!(record.consecutive_failures, 0);
        assert_eq!(sync.next_delay("a:1"), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn backoff_doubles_to_ceiling_and_resets() {
        let script = vec![ok(1), down(), down(), down(), down(), ok(1)];
        let sync = Synchronizer::new(PeerStore::new(), ScriptedClient::new(script), config());

        sync.sync_once("a:1").await.unwrap();
        let mut seen = Vec::new();
        for _ in 0..4 {
            assert!(sync.sync_once("a:1").await.is_err());
            seen.push(sync.backoff_for("a:1"));
        }
        assert_eq!(
            seen,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(4)
            ]
        );
        assert_eq!(sync.next_delay("a:1"), Duration::from_secs(4));

        let record = sync.store().get(&id(1)).await.unwrap();
        assert!(record.stale);
        assert!(record.quality < 0.2);

        sync.sync_once("a:1").await.unwrap();
        let record = sync.store().get(&id(1)).await.unwrap();
        assert!(!record.stale);
        assert_eq!(record.backoff, Duration::from_secs(1));
        assert_eq!(sync.next_delay("a:1"), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn slow_peer_times_out() {
        let sync = Synchronizer::new(PeerStore::new(), ScriptedClient::new(vec![None]), config());
        let err = sync.sync_once("slow:1").await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        // Never contacted successfully, so nothing in the store.
        assert!(sync.store().all().await.is_empty());
    }

    #[tokio::test]
    async fn peer_id_not_derived_from_key_is_rejected() {
        let script = vec![claim(id(1), &key(2)), claim(String::new(), &key(1)), ok(1)];
        let sync = Synchronizer::new(PeerStore::new(), ScriptedClient::new(script), config());

        assert!(matches!(sync.sync_once("a:1").await, Err(Error::Protocol(_))));
        assert!(matches!(sync.sync_once("a:1").await, Err(Error::Protocol(_))));
        assert!(sync.store().all().await.is_empty());
        assert_eq!(sync.backoff_for("a:1"), Duration::from_secs(2));

        sync.sync_once("a:1").await.unwrap();
        assert!(sync.store().get(&id(1)).await.is_some());
    }

    #[tokio::test]
    async fn run_peer_stops_on_shutdown() {
        let sync = Arc::new(Synchronizer::new(PeerStore::new(), ScriptedClient::new(vec![]), config()));
        let (tx, rx) = watch::channel(false);
        let handles = sync.spawn(&["a:1".to_string()], rx);
        tx.send(true).unwrap();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        }
    }

    #[test]
    fn zero_jitter_is_exact() {
        assert_eq!(jittered(Duration::from_secs(3), 0.0), Duration::from_secs(3));
    }

    proptest! {
        #[test]
        fn jitter_stays_in_bounds(base_ms in 1u64..600_000, jitter in 0.0f64..0.99) {
            let base = Duration::from_millis(base_ms);
            let d = jittered(base, jitter).as_secs_f64();
            let b = base.as_secs_f64();
            prop_assert!(d >= b * (1.0 - jitter) - 1e-6);
            prop_assert!(d <= b * (1.0 + jitter) + 1e-6);
        }
    }

    #[test]
    fn config_validation() {
        assert!(SyncConfig::default().validate().is_ok());
        let bad = SyncConfig {
            jitter: 1.5,
            ..SyncConfig::default()
        };
        assert!(bad.validate().is_err());
        let bad = SyncConfig {
            backoff_base: Duration::from_secs(10),
            backoff_ceiling: Duration::from_secs(1),
            ..SyncConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
