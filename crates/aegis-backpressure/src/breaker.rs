//! The backpressure state machine.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::admission::{AdmissionControl, AdmissionTicket, JobOutcome};
use crate::config::BackpressureConfig;
use crate::error::{BlockReason, Rejection, Result};
use crate::state::{BreakerState, PressureSignal, PressureState, PressureTransition, TransitionReason};

const TRANSITION_CHANNEL_CAPACITY: usize = 64;

/// Supplies load indicators to the tick loop.
pub trait PressureInputs: Send + Sync + 'static {
    fn signal(&self) -> PressureSignal;

    /// Governor trust in [0, 1]. Full trust adds no pressure.
    fn trust(&self) -> f64 {
        1.0
    }
}

struct Inner {
    state: BreakerState,
    limit: usize,
    in_flight: usize,
    hard_streak: u32,
    opened_at: Option<Instant>,
    recovering_since: Option<Instant>,
    probes_admitted: u32,
    probe_streak: u32,
    /// Bumped on every entry into BREAKER_OPEN or RECOVERING; probes from
    /// an earlier epoch no longer count.
    epoch: u64,
    pressure: f64,
    last_reason: TransitionReason,
    admitted: u64,
    rejected: u64,
    succeeded: u64,
    failed: u64,
    last_block: Option<BlockReason>,
}

/// Circuit breaker plus concurrency limiter.
pub struct BackpressureGovernor {
    config: BackpressureConfig,
    inner: Mutex<Inner>,
    transitions: broadcast::Sender<PressureTransition>,
}

impl BackpressureGovernor {
    pub fn new(config: BackpressureConfig) -> Result<Self> {
        config.validate()?;
        let (transitions, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        let inner = Inner {
            state: BreakerState::Normal,
            limit: config.base_limit,
            in_flight: 0,
            hard_streak: 0,
            opened_at: None,
            recovering_since: None,
            probes_admitted: 0,
            probe_streak: 0,
            epoch: 0,
            pressure: 0.0,
            last_reason: TransitionReason::Initial,
            admitted: 0,
            rejected: 0,
            succeeded: 0,
            failed: 0,
            last_block: None,
        };
        Ok(Self {
            config,
            inner: Mutex::new(inner),
            transitions,
        })
    }

    pub fn config(&self) -> &BackpressureConfig {
        &self.config
    }

    /// Receiver for every state transition.
    pub fn subscribe(&self) -> broadcast::Receiver<PressureTransition> {
        self.transitions.subscribe()
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn snapshot(&self) -> PressureState {
        let inner = self.lock();
        PressureState {
            state: inner.state,
            concurrency_limit: inner.limit,
            in_flight: inner.in_flight,
            last_reason: inner.last_reason,
            pressure: inner.pressure,
            hard_streak: inner.hard_streak,
            probes_admitted: inner.probes_admitted,
            probe_streak: inner.probe_streak,
            admitted: inner.admitted,
            rejected: inner.rejected,
            succeeded: inner.succeeded,
            failed: inner.failed,
            last_block: inner.last_block,
        }
    }

    pub fn tick(&self, signal: PressureSignal, trust: f64) -> PressureState {
        self.tick_at(signal, trust, Instant::now())
    }

    /// Evaluate one pressure sample at an explicit instant.
    pub fn tick_at(&self, signal: PressureSignal, trust: f64, now: Instant) -> PressureState {
        {
            let mut inner = self.lock();
            let pressure = signal.pressure(trust, self.config.trust_weight);
            inner.pressure = pressure;

            match inner.state {
                BreakerState::Normal | BreakerState::Throttled => {
                    if signal.critical {
                        self.open(&mut inner, TransitionReason::CriticalSignal, now);
                    } else {
                        if pressure > self.config.hard_threshold {
                            inner.hard_streak += 1;
                        } else {
                            inner.hard_streak = 0;
                        }

                        if inner.hard_streak >= self.config.hard_ticks {
                            let ticks = inner.hard_streak;
                            self.open(&mut inner, TransitionReason::SustainedHardPressure { ticks }, now);
                        } else if pressure > self.config.soft_threshold {
                            inner.limit = self.config.throttled_limit(pressure);
                            if inner.state == BreakerState::Normal {
                                self.move_to(
                                    &mut inner,
                                    BreakerState::Throttled,
                                    TransitionReason::SoftThresholdExceeded { pressure },
                                );
                            }
                        } else if inner.state == BreakerState::Throttled {
                            inner.limit = self.config.base_limit;
                            self.move_to(
                                &mut inner,
                                BreakerState::Normal,
                                TransitionReason::PressureRelieved { pressure },
                            );
                        }
                    }
                }
                BreakerState::BreakerOpen => {
                    if signal.critical {
                        // Critical while open restarts the cool-down.
                        inner.opened_at = Some(now);
                    } else if self.cooldown_remaining(&inner, now).is_zero() {
                        self.start_recovery(&mut inner, now);
                    }
                }
                BreakerState::Recovering => {
                    if signal.critical {
                        self.open(&mut inner, TransitionReason::CriticalSignal, now);
                    } else if inner
                        .recovering_since
                        .is_some_and(|since| now.saturating_duration_since(since) >= self.config.probe_window)
                    {
                        self.open(&mut inner, TransitionReason::ProbeWindowExpired, now);
                    }
                }
            }
        }
        self.snapshot()
    }

    pub fn try_admit_at(&self, now: Instant) -> std::result::Result<AdmissionTicket, Rejection> {
        let mut inner = self.lock();
        let state = inner.state;

        let admitted = match state {
            BreakerState::Normal | BreakerState::Throttled => {
                if inner.in_flight < inner.limit {
                    Ok(false)
                } else {
                    Err((BlockReason::ConcurrencyLimit, None))
                }
            }
            BreakerState::BreakerOpen => {
                Err((BlockReason::BreakerOpen, Some(self.cooldown_remaining(&inner, now))))
            }
            BreakerState::Recovering => {
                if inner.probes_admitted < self.config.probe_budget {
                    inner.probes_admitted += 1;
                    Ok(true)
                } else {
                    Err((BlockReason::ProbeBudgetExhausted, None))
                }
            }
        };

        match admitted {
            Ok(probe) => {
                inner.in_flight += 1;
                inner.admitted += 1;
                Ok(AdmissionTicket::new(probe, inner.epoch))
            }
            Err((reason, retry_after)) => {
                inner.rejected += 1;
                inner.last_block = Some(reason);
                debug!(reason = reason.code(), state = %state, in_flight = inner.in_flight, "Admission rejected");
                Err(Rejection {
                    reason,
                    state,
                    retry_after,
                })
            }
        }
    }

    pub fn complete_at(&self, ticket: AdmissionTicket, outcome: JobOutcome, now: Instant) {
        let mut inner = self.lock();
        inner.in_flight = inner.in_flight.saturating_sub(1);
        match outcome {
            JobOutcome::Success => inner.succeeded += 1,
            JobOutcome::Failure => inner.failed += 1,
        }

        if !ticket.is_probe() || ticket.epoch() != inner.epoch || inner.state != BreakerState::Recovering {
            return;
        }

        match outcome {
            JobOutcome::Success => {
                inner.probe_streak += 1;
                if inner.probe_streak >= self.config.probe_successes {
                    let count = inner.probe_streak;
                    inner.limit = self.config.base_limit;
                    inner.hard_streak = 0;
                    inner.recovering_since = None;
                    self.move_to(&mut inner, BreakerState::Normal, TransitionReason::ProbesSucceeded { count });
                }
            }
            JobOutcome::Failure => self.open(&mut inner, TransitionReason::ProbeFailed, now),
        }
    }

    /// Sample inputs every tick interval until shutdown.
    pub async fn run<I: PressureInputs>(self: Arc<Self>, inputs: Arc<I>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            self.tick(inputs.signal(), inputs.trust());
        }
        debug!("Backpressure loop stopped");
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cooldown_remaining(&self, inner: &Inner, now: Instant) -> Duration {
        match inner.opened_at {
            Some(at) => self.config.cooldown.saturating_sub(now.saturating_duration_since(at)),
            None => Duration::ZERO,
        }
    }

    fn open(&self, inner: &mut Inner, reason: TransitionReason, now: Instant) {
        inner.opened_at = Some(now);
        inner.recovering_since = None;
        inner.hard_streak = 0;
        inner.probes_admitted = 0;
        inner.probe_streak = 0;
        inner.limit = 0;
        inner.epoch += 1;
        self.move_to(inner, BreakerState::BreakerOpen, reason);
    }

    fn start_recovery(&self, inner: &mut Inner, now: Instant) {
        inner.recovering_since = Some(now);
        inner.probes_admitted = 0;
        inner.probe_streak = 0;
        inner.limit = self.config.probe_budget as usize;
        inner.epoch += 1;
        self.move_to(inner, BreakerState::Recovering, TransitionReason::CooldownElapsed);
    }

    fn move_to(&self, inner: &mut Inner, to: BreakerState, reason: TransitionReason) {
        let from = inner.state;
        inner.state = to;
        inner.last_reason = reason;

        if to == BreakerState::BreakerOpen {
            warn!(from = %from, to = %to, reason = %reason, pressure = inner.pressure, "Backpressure breaker opened");
        } else {
            info!(from = %from, to = %to, reason = %reason, limit = inner.limit, "Backpressure state changed");
        }

        // No subscribers is fine.
        let _ = self.transitions.send(PressureTransition {
            from,
            to,
            reason,
            at: unix_millis(),
        });
    }
}

impl AdmissionControl for BackpressureGovernor {
    fn try_admit(&self) -> std::result::Result<AdmissionTicket, Rejection> {
        self.try_admit_at(Instant::now())
    }

    fn complete(&self, ticket: AdmissionTicket, outcome: JobOutcome) {
        self.complete_at(ticket, outcome, Instant::now())
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
