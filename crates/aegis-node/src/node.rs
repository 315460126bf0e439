//! Node context and task supervision.

use std::net::SocketAddr;
use std::sync::Arc;

use aegis_backpressure::{AdmissionControl, BackpressureGovernor, OpenAdmission, PressureState};
use aegis_governor::{AlwaysOpen, GateSource, Governor, GovernorState};
use aegis_ledger::{ChainReport, EntrySigner, Ledger};
use aegis_peers::{
    compute_peer_id, encode_public_key, now_millis, serve_summaries, PeerRecord, PeerStore, PeerSummary, Synchronizer,
    TcpSummaryClient,
};
use aegis_resonance::MemoryResonanceWindow;
use ed25519_dalek::SigningKey;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::admin::AdminSocket;
use crate::config::NodeConfig;
use crate::error::Result;
use crate::metrics::{MetricsSnapshot, NodeMetrics};
use crate::telemetry::{LoadGauge, NodeTelemetry};

/// Everything a running node shares between its tasks. Built once at
/// startup and handed around as `Arc`.
pub struct NodeContext {
    config: NodeConfig,
    peer_id: String,
    public_key: String,
    store: PeerStore,
    ledger: Arc<Ledger>,
    governor: Option<Arc<Governor>>,
    gate: Arc<dyn GateSource>,
    backpressure: Option<Arc<BackpressureGovernor>>,
    admission: Arc<dyn AdmissionControl>,
    telemetry: Arc<NodeTelemetry>,
    metrics: Arc<NodeMetrics>,
}

impl NodeContext {
    /// Validate the config and build every enabled subsystem. Disabled ones
    /// get their no-op stand-ins.
    pub fn new(config: NodeConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let ledger = Arc::new(Ledger::open(&config.ledger, config.sign_entries)?);
        // Unsigned ledgers still need a stable identity for this run.
        let identity = match ledger.signer() {
            EntrySigner::Ed25519(key) => key.verifying_key(),
            EntrySigner::Unsigned => SigningKey::generate(&mut rand::thread_rng()).verifying_key(),
        };
        let peer_id = compute_peer_id(&identity);
        let public_key = encode_public_key(&identity);

        let governor = if config.features.governor {
            Some(Arc::new(Governor::new(config.governor.clone())?))
        } else {
            None
        };
        let gate: Arc<dyn GateSource> = match &governor {
            Some(g) => Arc::clone(g) as Arc<dyn GateSource>,
            None => Arc::new(AlwaysOpen),
        };

        let backpressure = if config.features.backpressure {
            Some(Arc::new(BackpressureGovernor::new(config.backpressure.clone())?))
        } else {
            None
        };
        let admission: Arc<dyn AdmissionControl> = match &backpressure {
            Some(bp) => Arc::clone(bp) as Arc<dyn AdmissionControl>,
            None => Arc::new(OpenAdmission),
        };

        let window = if config.features.resonance {
            Some(MemoryResonanceWindow::new(
                config.resonance.capacity,
                config.resonance.min_samples,
            )?)
        } else {
            None
        };
        let telemetry = Arc::new(NodeTelemetry::new(
            window,
            config.latency_mode,
            Arc::clone(&gate),
            backpressure.clone(),
        ));

        info!(
            peer_id = %peer_id,
            height = ledger.height(),
            federation = config.features.federation,
            governor = config.features.governor,
            backpressure = config.features.backpressure,
            resonance = config.features.resonance,
            "Node context ready"
        );

        Ok(Arc::new(Self {
            config,
            peer_id,
            public_key,
            store: PeerStore::new(),
            ledger,
            governor,
            gate,
            backpressure,
            admission,
            telemetry,
            metrics: Arc::new(NodeMetrics::new()),
        }))
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn peers(&self) -> &PeerStore {
        &self.store
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Trust gate for downstream consumers.
    pub fn gate(&self) -> &Arc<dyn GateSource> {
        &self.gate
    }

    pub fn governor(&self) -> Option<&Arc<Governor>> {
        self.governor.as_ref()
    }

    /// Admission check for expensive work.
    pub fn admission(&self) -> &Arc<dyn AdmissionControl> {
        &self.admission
    }

    pub fn backpressure(&self) -> Option<&Arc<BackpressureGovernor>> {
        self.backpressure.as_ref()
    }

    pub fn telemetry(&self) -> &Arc<NodeTelemetry> {
        &self.telemetry
    }

    /// Where the host application reports queue depth and saturation.
    pub fn load(&self) -> &LoadGauge {
        self.telemetry.load()
    }

    pub fn local_summary(&self) -> PeerSummary {
        PeerSummary {
            peer_id: self.peer_id.clone(),
            public_key: self.public_key.clone(),
            ledger_height: self.ledger.height(),
            chain_tip: self.ledger.tip_hex(),
            timestamp: now_millis(),
        }
    }

    pub async fn governor_state(&self) -> Option<GovernorState> {
        match &self.governor {
            Some(g) => Some(g.state().await),
            None => None,
        }
    }

    pub fn pressure_state(&self) -> Option<PressureState> {
        self.backpressure.as_ref().map(|bp| bp.snapshot())
    }

    pub async fn all_peers(&self) -> Vec<PeerRecord> {
        self.store.all().await
    }

    /// Take one TRSI sample: η consistency from the governor, or chain
    /// continuity when the governor is off. Also refreshes peer latency.
    pub async fn sample_resonance(&self) -> Result<()> {
        let sample = match &self.governor {
            Some(g) => g.state().await.components.consistency,
            None => self
                .telemetry
                .last_chain()
                .map(|report| report.continuity)
                .unwrap_or(1.0),
        };
        self.telemetry.record_sample(sample)?;

        let now = now_millis();
        let snapshot = self.store.snapshot().await;
        self.telemetry.record_latency(snapshot.freshest_contact_hours(now));

        let stability = self.telemetry.stability();
        self.metrics.record_stability(stability.value());
        debug!(sample, stability = stability.value(), cold = stability.is_cold(), "Resonance sample");
        Ok(())
    }

    /// Verify the whole chain and feed the result to telemetry.
    pub fn audit_chain(&self) -> Result<ChainReport> {
        let report = self.ledger.verify_chain()?;
        self.telemetry.record_chain(report.clone());
        self.metrics.record_chain(&report);
        Ok(report)
    }

    pub async fn refresh_metrics(&self) -> MetricsSnapshot {
        let (live, stale) = self.store.counts().await;
        self.metrics.record_peers(live, stale);
        if let Some(state) = self.governor_state().await {
            self.metrics.record_governor(&state);
        }
        if let Some(state) = self.pressure_state() {
            self.metrics.record_backpressure(&state);
        }
        self.metrics.record_ledger(&self.ledger.stats());
        self.metrics.snapshot()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Run one periodic task until shutdown. An iteration in progress
    /// always completes.
    async fn run_task(self: Arc<Self>, task: Task, mut shutdown: watch::Receiver<bool>) {
        let interval = match task {
            Task::ResonanceSampler => self.config.resonance.sample_interval,
            Task::ChainAudit => self.config.audit_interval,
            Task::Metrics => self.config.metrics_interval,
        };
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            match task {
                Task::ResonanceSampler => {
                    if let Err(e) = self.sample_resonance().await {
                        warn!("Resonance sample rejected: {}", e);
                    }
                }
                Task::ChainAudit => {
                    if let Err(e) = self.audit_chain() {
                        error!("Chain audit failed: {}", e);
                    }
                }
                Task::Metrics => {
                    self.refresh_metrics().await;
                }
            }
        }
        debug!(?task, "Task stopped");
    }
}

#[derive(Debug, Clone, Copy)]
enum Task {
    ResonanceSampler,
    ChainAudit,
    Metrics,
}

/// A running node: its context plus the background tasks.
pub struct Node {
    context: Arc<NodeContext>,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    summary_addr: Option<SocketAddr>,
}

impl Node {
    /// Build the context and start every enabled task.
    pub async fn start(config: NodeConfig) -> Result<Self> {
        let context = NodeContext::new(config)?;
        Self::start_with(context).await
    }

    pub async fn start_with(context: Arc<NodeContext>) -> Result<Self> {
        let (shutdown_tx, shutdown) = watch::channel(false);
        let mut handles = Vec::new();
        let config = context.config().clone();

        let mut summary_addr = None;
        if config.features.federation {
            let listener = TcpListener::bind(config.listen_addr).await?;
            summary_addr = Some(listener.local_addr()?);

            let ctx = Arc::clone(&context);
            let provider = Arc::new(move || ctx.local_summary());
            handles.push(tokio::spawn(serve_summaries(listener, provider, shutdown.clone())));

            let synchronizer = Arc::new(Synchronizer::new(
                context.peers().clone(),
                TcpSummaryClient,
                config.sync.clone(),
            ));
            handles.extend(synchronizer.spawn(&config.bootstrap_peers, shutdown.clone()));
        }

        if let Some(governor) = context.governor() {
            handles.push(tokio::spawn(Arc::clone(governor).run(
                context.peers().clone(),
                Arc::clone(context.telemetry()),
                shutdown.clone(),
            )));
        }

        if let Some(bp) = context.backpressure() {
            handles.push(tokio::spawn(
                Arc::clone(bp).run(Arc::clone(context.telemetry()), shutdown.clone()),
            ));
        }

        let mut tasks = vec![Task::Metrics];
        if config.features.resonance {
            tasks.push(Task::ResonanceSampler);
        }
        if config.features.ledger_audit {
            tasks.push(Task::ChainAudit);
        }
        for task in tasks {
            handles.push(tokio::spawn(Arc::clone(&context).run_task(task, shutdown.clone())));
        }

        if let Some(path) = &config.admin_socket {
            let admin = AdminSocket::bind(Arc::clone(&context), path)?;
            handles.push(tokio::spawn(admin.run(shutdown.clone())));
        }

        info!(peer_id = %context.peer_id(), tasks = handles.len(), "Node started");
        Ok(Self {
            context,
            shutdown_tx,
            handles,
            summary_addr,
        })
    }

    pub fn context(&self) -> &Arc<NodeContext> {
        &self.context
    }

    /// Bound address of the summary endpoint, when federation is on.
    pub fn summary_addr(&self) -> Option<SocketAddr> {
        self.summary_addr
    }

    /// Signal every task and wait for them to finish.
    pub async fn shutdown(self) {
        info!("Shutting down node");
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("Task ended abnormally: {}", e);
            }
        }
        if let Some(path) = &self.context.config().admin_socket {
            let _ = std::fs::remove_file(path);
        }
        info!("Node stopped");
    }

    /// Run until Ctrl-C, then shut down cleanly.
    pub async fn run_until_ctrl_c(self) -> Result<()> {
        tokio::signal::ctrl_c().await?;
        self.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureToggles;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn local_config() -> NodeConfig {
        let mut config = NodeConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            ..NodeConfig::default()
        };
        config.resonance.min_samples = 2;
        config.resonance.capacity = 8;
        config
    }

    #[tokio::test]
    async fn disabled_subsystems_use_no_op_stand_ins() {
        let config = NodeConfig {
            features: FeatureToggles {
                federation: false,
                governor: false,
                backpressure: false,
                ledger_audit: false,
                resonance: false,
            },
            ..local_config()
        };
        let ctx = NodeContext::new(config).unwrap();
        ctx.sample_resonance().await.unwrap();
        assert_eq!(ctx.telemetry().window_len(), 0);
        assert_eq!(ctx.telemetry().ris().stability, aegis_resonance::NEUTRAL_STABILITY);
        assert!(ctx.governor().is_none());
        assert!(ctx.gate().is_open());
        assert_eq!(ctx.gate().trust(), 1.0);
        for _ in 0..100 {
            let ticket = ctx.admission().try_admit().unwrap();
            ctx.admission().complete(ticket, aegis_backpressure::JobOutcome::Success);
        }
        assert!(ctx.governor_state().await.is_none());
        assert!(ctx.pressure_state().is_none());
    }

    #[tokio::test]
    async fn summary_reflects_ledger() {
        let ctx = NodeContext::new(local_config()).unwrap();
        assert!(ctx.peer_id().starts_with("b3b3/"));
        let summary = ctx.local_summary();
        assert_eq!(summary.ledger_height, 0);
        aegis_peers::check_peer_id(&summary.peer_id, &summary.public_key).unwrap();

        ctx.ledger().register("a", json!(1), BTreeMap::new()).unwrap();
        let summary = ctx.local_summary();
        assert_eq!(summary.ledger_height, 1);
        assert_eq!(summary.chain_tip, ctx.ledger().tip_hex());
    }

    #[tokio::test]
    async fn audit_and_sample_feed_metrics() {
        let ctx = NodeContext::new(local_config()).unwrap();
        ctx.ledger().register("a", json!(1), BTreeMap::new()).unwrap();

        let report = ctx.audit_chain().unwrap();
        assert!(report.is_intact());

        ctx.sample_resonance().await.unwrap();
        ctx.sample_resonance().await.unwrap();
        assert_eq!(ctx.telemetry().window_len(), 2);

        let snap = ctx.refresh_metrics().await;
        assert_eq!(snap.ledger_height, 1);
        assert_eq!(snap.anchor_attestations_ok, 1);
        assert_eq!(snap.chain_continuity, 1.0);
        assert_eq!(snap.backpressure_state, Some(aegis_backpressure::BreakerState::Normal));
    }

    #[tokio::test]
    async fn node_starts_and_stops() {
        let mut config = local_config();
        config.governor.tick_interval = Duration::from_millis(10);
        config.backpressure.tick_interval = Duration::from_millis(10);
        config.metrics_interval = Duration::from_millis(10);

        let node = Node::start(config).await.unwrap();
        let addr = node.summary_addr().unwrap();
        assert_ne!(addr.port(), 0);

        tokio::time::sleep(Duration::from_millis(60)).await;
        let ticks = node.context().governor_state().await.unwrap().ticks;
        assert!(ticks >= 1);

        tokio::time::timeout(Duration::from_secs(5), node.shutdown())
            .await
            .unwrap();
    }
}
