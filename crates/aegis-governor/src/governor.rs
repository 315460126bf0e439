//! The governor tick and its control loop.

use std::sync::Arc;

use aegis_peers::{now_millis, PeerSnapshot, PeerStore};
use tokio::sync::{watch, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::config::GovernorConfig;
use crate::error::Result;
use crate::gate::{GateSignal, GateSource};
use crate::state::{Components, GovernorState, Telemetry};

/// Supplies local telemetry to the control loop.
pub trait TelemetrySource: Send + Sync + 'static {
    fn telemetry(&self) -> Telemetry;
}

/// Compute the next state from the previous one. Pure and deterministic.
pub fn evaluate(
    config: &GovernorConfig,
    prev: &GovernorState,
    snapshot: &PeerSnapshot,
    telemetry: &Telemetry,
    now: u64,
) -> GovernorState {
    let outcome = sanitize(telemetry.outcome_score);
    let previous = prev.last_outcome.unwrap_or(outcome);
    let progress = (outcome + config.trend_gain * (outcome - previous)).clamp(0.0, 1.0);

    let live_peers = snapshot.live_count();
    let novelty = if live_peers == 0 {
        0.0
    } else {
        let diversity = snapshot.distinct_tips() as f64 / live_peers as f64;
        (diversity * snapshot.mean_quality()).clamp(0.0, 1.0)
    };

    let consistency = consistency(config, &prev.eta_history);

    let g_star = (config.local_weight * progress * consistency + config.federated_weight * novelty)
        .clamp(0.0, 1.0);

    let eta = (prev.eta + config.kappa * (config.target - g_star)).clamp(config.eta_min, config.eta_max);

    let mut eta_history = prev.eta_history.clone();
    eta_history.push_back(eta);
    while eta_history.len() > config.eta_history {
        eta_history.pop_front();
    }

    let ris = sanitize(telemetry.ris.score);

    GovernorState {
        g_star,
        components: Components {
            progress,
            novelty,
            consistency,
        },
        eta,
        ris,
        trust: g_star * ris,
        gate_open: g_star >= config.gate_threshold,
        live_peers,
        last_outcome: Some(outcome),
        eta_history,
        updated_at: now,
        ticks: prev.ticks + 1,
    }
}

/// 1 for a perfectly steady η, falling to 0 as its spread reaches half the band.
fn consistency(config: &GovernorConfig, history: &std::collections::VecDeque<f64>) -> f64 {
    if history.len() < 2 {
        return 1.0;
    }
    let n = history.len() as f64;
    let mean = history.iter().sum::<f64>() / n;
    let stdev = (history.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / n).sqrt();
    let band = config.eta_max - config.eta_min;
    1.0 - (2.0 * stdev / band).clamp(0.0, 1.0)
}

fn sanitize(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

/// Owner and sole writer of [`GovernorState`].
pub struct Governor {
    config: GovernorConfig,
    state: RwLock<GovernorState>,
    gate_tx: watch::Sender<GateSignal>,
}

impl Governor {
    pub fn new(config: GovernorConfig) -> Result<Self> {
        config.validate()?;
        let (gate_tx, _) = watch::channel(GateSignal::closed(config.gate_threshold));
        Ok(Self {
            state: RwLock::new(GovernorState::initial(&config)),
            config,
            gate_tx,
        })
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    /// Copy of the current state.
    pub async fn state(&self) -> GovernorState {
        self.state.read().await.clone()
    }

    /// Receiver notified whenever the gate crosses the threshold.
    pub fn subscribe(&self) -> watch::Receiver<GateSignal> {
        self.gate_tx.subscribe()
    }

    /// Latest gate value.
    pub fn gate(&self) -> GateSignal {
        *self.gate_tx.borrow()
    }

    pub async fn tick(&self, snapshot: &PeerSnapshot, telemetry: &Telemetry) -> GovernorState {
        self.tick_at(snapshot, telemetry, now_millis()).await
    }

    /// Run one tick with an explicit timestamp.
    pub async fn tick_at(&self, snapshot: &PeerSnapshot, telemetry: &Telemetry, now: u64) -> GovernorState {
        let mut state = self.state.write().await;
        let next = evaluate(&self.config, &state, snapshot, telemetry, now);

        let crossed = next.gate_open != state.gate_open || next.ticks == 1;
        if next.gate_open != state.gate_open {
            info!(
                open = next.gate_open,
                g_star = next.g_star,
                threshold = self.config.gate_threshold,
                "Governor gate crossed threshold"
            );
        }
        self.gate_tx.send_if_modified(|gate| {
            gate.open = next.gate_open;
            gate.g_star = next.g_star;
            gate.trust = next.trust;
            gate.at = now;
            crossed
        });

        debug!(
            g_star = next.g_star,
            progress = next.components.progress,
            novelty = next.components.novelty,
            consistency = next.components.consistency,
            eta = next.eta,
            peers = next.live_peers,
            "Governor tick"
        );

        *state = next.clone();
        next
    }

    /// Tick on a fixed interval until shutdown.
    pub async fn run<T: TelemetrySource>(
        self: Arc<Self>,
        store: PeerStore,
        telemetry: Arc<T>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            let snapshot = store.snapshot().await;
            let inputs = telemetry.telemetry();
            self.tick(&snapshot, &inputs).await;
        }
        debug!("Governor loop stopped");
    }
}

impl GateSource for Governor {
    fn is_open(&self) -> bool {
        self.gate_tx.borrow().open
    }

    fn trust(&self) -> f64 {
        self.gate_tx.borrow().trust
    }
}
