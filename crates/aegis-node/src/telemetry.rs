//! Local signals feeding the governor and the backpressure loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use aegis_backpressure::{BackpressureGovernor, PressureInputs, PressureSignal};
use aegis_governor::{GateSource, Telemetry, TelemetrySource};
use aegis_ledger::ChainReport;
use aegis_resonance::{LatencyMode, MemoryResonanceWindow, RisBreakdown, Stability};

use crate::error::Result;
use crate::metrics::AtomicF64;

/// Load figures reported by the host application.
#[derive(Debug, Default)]
pub struct LoadGauge {
    queue_depth: AtomicF64,
    saturation: AtomicF64,
    critical: AtomicBool,
}

impl LoadGauge {
    /// Queue depth relative to capacity, in [0, 1].
    pub fn set_queue_depth(&self, depth: f64) {
        self.queue_depth.store(depth);
    }

    /// Worst of CPU, memory and disk saturation, in [0, 1].
    pub fn set_saturation(&self, saturation: f64) {
        self.saturation.store(saturation);
    }

    /// A critical signal opens the breaker on the next tick.
    pub fn set_critical(&self, critical: bool) {
        self.critical.store(critical, Ordering::Relaxed);
    }
}

#[derive(Default)]
struct JobCounts {
    succeeded: u64,
    failed: u64,
}

impl JobCounts {
    /// Move to the given totals and return how many jobs of each kind
    /// completed since the last move.
    fn advance(&mut self, succeeded: u64, failed: u64) -> (u64, u64) {
        let delta = (
            succeeded.saturating_sub(self.succeeded),
            failed.saturating_sub(self.failed),
        );
        self.succeeded = succeeded;
        self.failed = failed;
        delta
    }
}

struct OutcomeCursor {
    seen: JobCounts,
    score: f64,
}

/// Node-local telemetry: resonance window, last chain audit, peer latency,
/// job outcomes and reported load.
pub struct NodeTelemetry {
    /// `None` when resonance sampling is switched off.
    window: Option<Mutex<MemoryResonanceWindow>>,
    latency_mode: LatencyMode,
    latency_hours: AtomicF64,
    chain: Mutex<Option<ChainReport>>,
    gate: Arc<dyn GateSource>,
    backpressure: Option<Arc<BackpressureGovernor>>,
    load: LoadGauge,
    last_jobs: Mutex<JobCounts>,
    outcome: Mutex<OutcomeCursor>,
}

impl NodeTelemetry {
    pub fn new(
        window: Option<MemoryResonanceWindow>,
        latency_mode: LatencyMode,
        gate: Arc<dyn GateSource>,
        backpressure: Option<Arc<BackpressureGovernor>>,
    ) -> Self {
        Self {
            window: window.map(Mutex::new),
            latency_mode,
            latency_hours: AtomicF64::default(),
            chain: Mutex::new(None),
            gate,
            backpressure,
            load: LoadGauge::default(),
            last_jobs: Mutex::new(JobCounts::default()),
            outcome: Mutex::new(OutcomeCursor {
                seen: JobCounts::default(),
                score: 1.0,
            }),
        }
    }

    pub fn load(&self) -> &LoadGauge {
        &self.load
    }

    /// Append one TRSI sample to the resonance window. Dropped when
    /// sampling is off.
    pub fn record_sample(&self, value: f64) -> Result<()> {
        if let Some(window) = &self.window {
            lock(window).add_sample(value)?;
        }
        Ok(())
    }

    pub fn stability(&self) -> Stability {
        match &self.window {
            Some(window) => lock(window).stability(),
            None => Stability::Disabled,
        }
    }

    pub fn window_len(&self) -> usize {
        self.window.as_ref().map_or(0, |window| lock(window).len())
    }

    pub fn record_chain(&self, report: ChainReport) {
        *lock(&self.chain) = Some(report);
    }

    pub fn last_chain(&self) -> Option<ChainReport> {
        lock(&self.chain).clone()
    }

    /// Age of the freshest peer contact. No peers means no cross-node
    /// latency to penalize.
    pub fn record_latency(&self, hours: Option<f64>) {
        self.latency_hours.store(hours.unwrap_or(0.0));
    }

    /// Integrity score from the current window, last audit and latency.
    pub fn ris(&self) -> RisBreakdown {
        let stability = self.stability().value();
        let (passed, total) = match lock(&self.chain).as_ref() {
            Some(report) => (report.verified, report.entries),
            None => (0, 0),
        };
        RisBreakdown::with_mode(stability, passed, total, self.latency_hours.load(), self.latency_mode)
    }

    /// Outcome score handed to the last governor tick.
    pub fn outcome_score(&self) -> f64 {
        lock(&self.outcome).score
    }

    /// Success share among jobs completed since the previous governor tick.
    /// A tick with no completions keeps the previous score. 1.0 without
    /// backpressure.
    fn tick_outcome(&self) -> f64 {
        let Some(bp) = &self.backpressure else {
            return 1.0;
        };
        let snap = bp.snapshot();
        let mut cursor = lock(&self.outcome);
        let (succeeded, failed) = cursor.seen.advance(snap.succeeded, snap.failed);
        let done = succeeded + failed;
        if done > 0 {
            cursor.score = succeeded as f64 / done as f64;
        }
        cursor.score
    }

    /// Failure share among jobs completed since the previous call.
    fn recent_error_rate(&self) -> f64 {
        let Some(bp) = &self.backpressure else {
            return 0.0;
        };
        let snap = bp.snapshot();
        let (succeeded, failed) = lock(&self.last_jobs).advance(snap.succeeded, snap.failed);

        let done = succeeded + failed;
        if done == 0 {
            0.0
        } else {
            failed as f64 / done as f64
        }
    }
}

impl TelemetrySource for NodeTelemetry {
    fn telemetry(&self) -> Telemetry {
        Telemetry {
            outcome_score: self.tick_outcome(),
            ris: self.ris(),
        }
    }
}

impl PressureInputs for NodeTelemetry {
    fn signal(&self) -> PressureSignal {
        PressureSignal {
            queue_depth: self.load.queue_depth.load(),
            error_rate: self.recent_error_rate(),
            saturation: self.load.saturation.load(),
            critical: self.load.critical.load(Ordering::Relaxed),
        }
    }

    fn trust(&self) -> f64 {
        self.gate.trust()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_backpressure::{AdmissionControl, BackpressureConfig, JobOutcome};
    use aegis_governor::{evaluate, AlwaysOpen, GovernorConfig, GovernorState};
    use aegis_peers::PeerSnapshot;
    use aegis_resonance::NEUTRAL_STABILITY;

    fn telemetry(backpressure: Option<Arc<BackpressureGovernor>>) -> NodeTelemetry {
        NodeTelemetry::new(
            Some(MemoryResonanceWindow::new(48, 4).unwrap()),
            LatencyMode::Measured,
            Arc::new(AlwaysOpen),
            backpressure,
        )
    }

    #[test]
    fn cold_window_gives_neutral_ris() {
        let t = telemetry(None);
        let ris = t.ris();
        assert_eq!(ris.stability, NEUTRAL_STABILITY);
        assert_eq!(ris.compliance, 1.0);
        assert!((ris.score - NEUTRAL_STABILITY.cbrt()).abs() < 1e-12);
        assert_eq!(t.outcome_score(), 1.0);
    }

    #[test]
    fn chain_break_and_latency_lower_ris() {
        let t = telemetry(None);
        for _ in 0..4 {
            t.record_sample(0.9).unwrap();
        }
        assert!(!t.stability().is_cold());
        let healthy = t.ris().score;

        t.record_chain(ChainReport {
            entries: 4,
            verified: 2,
            continuity: 0.5,
            first_break: Some(1),
        });
        let broken = t.ris().score;
        assert!(broken < healthy);

        t.record_latency(Some(30.0));
        assert_eq!(t.ris().score, 0.0);
    }

    #[test]
    fn disabled_window_reports_neutral_stability() {
        let t = NodeTelemetry::new(None, LatencyMode::Measured, Arc::new(AlwaysOpen), None);
        for _ in 0..10 {
            t.record_sample(0.1).unwrap();
        }
        assert_eq!(t.window_len(), 0);
        assert_eq!(t.stability(), Stability::Disabled);
        assert_eq!(t.ris().stability, NEUTRAL_STABILITY);
    }

    #[test]
    fn non_finite_sample_rejected() {
        let t = telemetry(None);
        assert!(t.record_sample(f64::NAN).is_err());
        assert_eq!(t.window_len(), 0);
    }

    #[test]
    fn error_rate_covers_recent_jobs_only() {
        let bp = Arc::new(BackpressureGovernor::new(BackpressureConfig::default()).unwrap());
        let t = telemetry(Some(Arc::clone(&bp)));

        for ok in [true, false, false, true] {
            let ticket = bp.try_admit().unwrap();
            bp.complete(ticket, JobOutcome::from(ok));
        }
        assert_eq!(t.signal().error_rate, 0.5);
        assert_eq!(t.signal().error_rate, 0.0);

        // The governor's view is tracked apart from the backpressure loop.
        assert_eq!(t.telemetry().outcome_score, 0.5);
        assert_eq!(t.outcome_score(), 0.5);
    }

    fn run_jobs(bp: &BackpressureGovernor, count: usize, ok: bool) {
        for _ in 0..count {
            let ticket = bp.try_admit().unwrap();
            bp.complete(ticket, JobOutcome::from(ok));
        }
    }

    #[test]
    fn outcome_follows_latest_tick_not_lifetime() {
        let bp = Arc::new(BackpressureGovernor::new(BackpressureConfig::default()).unwrap());
        let t = telemetry(Some(Arc::clone(&bp)));
        let config = GovernorConfig::default();
        let snapshot = PeerSnapshot::default();

        run_jobs(&bp, 1000, true);
        let healthy = t.telemetry();
        assert_eq!(healthy.outcome_score, 1.0);
        let before = evaluate(&config, &GovernorState::initial(&config), &snapshot, &healthy, 1);
        assert_eq!(before.components.progress, 1.0);

        run_jobs(&bp, 20, false);
        let failing = t.telemetry();
        assert_eq!(failing.outcome_score, 0.0);
        let after = evaluate(&config, &before, &snapshot, &failing, 2);
        assert_eq!(after.components.progress, 0.0);
        assert!(after.g_star < before.g_star);
        assert!(!after.gate_open);

        // A quiet tick carries the last score forward.
        assert_eq!(t.telemetry().outcome_score, 0.0);
        run_jobs(&bp, 3, true);
        assert_eq!(t.telemetry().outcome_score, 1.0);
    }

    #[test]
    fn outcome_is_neutral_without_backpressure() {
        let t = telemetry(None);
        assert_eq!(t.telemetry().outcome_score, 1.0);
    }

    #[test]
    fn load_gauge_feeds_signal() {
        let t = telemetry(None);
        t.load().set_queue_depth(0.4);
        t.load().set_saturation(0.9);
        t.load().set_critical(true);
        let s = t.signal();
        assert_eq!(s.queue_depth, 0.4);
        assert_eq!(s.saturation, 0.9);
        assert!(s.critical);
        assert_eq!(PressureInputs::trust(&t), 1.0);
    }
}
