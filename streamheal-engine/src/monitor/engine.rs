//! Playback monitor
//!
//! Orchestrates per-source tracking, candidate selection and recovery. Runs
//! on a single task: telemetry handlers and `evaluate` take `&mut self`, and
//! recovery awaits the source's async operations in place. Every attempt is
//! bounded by the stale-lock timeout, so a source operation that never
//! settles fails the attempt instead of stalling the monitor. The recovery
//! lock is the only cross-cutting guard.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::signals::{truncate_message, Signal, SignalAction, SignalKind, SignalRouter};
use super::state::{MonitorEvent, MonitorFact, MonitorState, SourceTrack};
use crate::buffer::analyzer;
use crate::candidate::{
    get_trust_info, policy_for, score_candidate, CandidateInputs, CandidateSelector, CandidateView,
    Selection, SelectionOutcome,
};
use crate::config::HealerConfig;
use crate::error::{Error, Result};
use crate::recovery::backoff::{BackoffManager, BackoffState};
use crate::recovery::heal::HealPipeline;
use crate::recovery::lock::RecoveryLock;
use crate::recovery::play::{self, categorize};
use crate::recovery::strategy::{self, AvSyncFixer, AvSyncRouter, StrategyKind, StrategyOutcome};
use crate::source::{PlayError, SourceHandle, SourceId};
use crate::state::SharedState;
use streamheal_common::events::HealEvent;
use streamheal_common::time::{self, elapsed_ms};

/// Raw telemetry reported by a source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Telemetry {
    /// Position changed; the monitor samples the source
    TimeUpdate,
    /// More data was buffered
    Progress,
    Error,
    Ended,
    Detached,
}

/// Why a recovery was not attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another recovery holds the lock
    LockBusy,
    /// Backoff window still open
    Backoff,
    /// Source is dead or not in a recoverable state
    NotRecoverable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryOutcome {
    Skipped(SkipReason),
    Completed {
        attempt_id: Uuid,
        strategy: StrategyKind,
        success: bool,
        detail: String,
    },
}

impl RecoveryOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, RecoveryOutcome::Completed { success: true, .. })
    }
}

/// Result of one `evaluate` cycle
#[derive(Debug, Clone)]
pub struct EvaluationReport {
    pub active: Option<SourceId>,
    pub selection: Selection,
    pub recovery: Option<RecoveryOutcome>,
}

struct MonitoredSource {
    handle: SourceHandle,
    track: SourceTrack,
    backoff: BackoffState,
}

pub struct PlaybackMonitor {
    config: HealerConfig,
    shared: Arc<SharedState>,
    sources: BTreeMap<SourceId, MonitoredSource>,
    selector: CandidateSelector,
    lock: RecoveryLock,
    backoff: BackoffManager,
    heal: HealPipeline,
    av_sync: AvSyncRouter,
    signals: SignalRouter,
}

impl PlaybackMonitor {
    pub fn new(config: HealerConfig, shared: Arc<SharedState>) -> Result<Self> {
        config.validate()?;

        let lock = RecoveryLock::new(config.stale_lock_timeout());
        Ok(Self {
            selector: CandidateSelector::from_config(&config.candidate),
            backoff: BackoffManager::new(&config.backoff),
            heal: HealPipeline::new(config.retry_delay()),
            av_sync: AvSyncRouter::default(),
            signals: SignalRouter::new(config.heal.message_truncate_len),
            sources: BTreeMap::new(),
            lock,
            config,
            shared,
        })
    }

    /// Share an existing recovery lock (e.g. with another monitor in the process)
    pub fn with_lock(mut self, lock: RecoveryLock) -> Self {
        self.lock = lock;
        self
    }

    pub fn with_av_sync_fixer(mut self, fixer: Arc<dyn AvSyncFixer>) -> Self {
        self.av_sync = AvSyncRouter::new(fixer);
        self
    }

    pub fn with_selector(mut self, selector: CandidateSelector) -> Self {
        self.selector = selector;
        self
    }

    /// Turn trusted failover on or off; the active source is kept
    pub fn set_failover(&mut self, enabled: bool) {
        self.config.candidate.failover = enabled;
        self.selector.set_policy(policy_for(&self.config.candidate));
    }

    pub fn signal_router_mut(&mut self) -> &mut SignalRouter {
        &mut self.signals
    }

    pub fn config(&self) -> &HealerConfig {
        &self.config
    }

    pub fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }

    pub fn lock(&self) -> &RecoveryLock {
        &self.lock
    }

    pub fn active(&self) -> Option<&SourceId> {
        self.selector.active()
    }

    pub fn source_ids(&self) -> impl Iterator<Item = &SourceId> {
        self.sources.keys()
    }

    pub fn state_of(&self, id: &SourceId) -> Option<MonitorState> {
        self.sources.get(id).map(|s| s.track.state)
    }

    pub fn track_of(&self, id: &SourceId) -> Option<&SourceTrack> {
        self.sources.get(id).map(|s| &s.track)
    }

    pub fn backoff_of(&self, id: &SourceId) -> Option<&BackoffState> {
        self.sources.get(id).map(|s| &s.backoff)
    }

    /// Start monitoring a source
    ///
    /// A dead source may be replaced under the same id; a live one may not.
    pub fn attach(&mut self, id: SourceId, handle: SourceHandle, now: Instant) -> Result<()> {
        if let Some(existing) = self.sources.get(&id) {
            if existing.track.state != MonitorState::Dead {
                return Err(Error::DuplicateSource(id.to_string()));
            }
            self.remove(&id, "replaced")?;
        }

        info!(source = %id, "Source attached");
        self.sources.insert(
            id.clone(),
            MonitoredSource {
                handle,
                track: SourceTrack::new(now),
                backoff: BackoffState::default(),
            },
        );
        self.shared.broadcast_event(HealEvent::SourceAttached {
            source_id: id.to_string(),
            timestamp: time::now(),
        });

        if self.selector.active().is_none() {
            self.selector.set_active(id);
        }
        Ok(())
    }

    /// Stop monitoring a source; its state is discarded
    pub fn remove(&mut self, id: &SourceId, reason: &str) -> Result<()> {
        if self.sources.remove(id).is_none() {
            return Err(Error::UnknownSource(id.to_string()));
        }
        self.selector.clear_if_active(id);

        info!(source = %id, reason, "Source removed");
        self.shared.broadcast_event(HealEvent::SourceRemoved {
            source_id: id.to_string(),
            reason: reason.to_string(),
            timestamp: time::now(),
        });
        Ok(())
    }

    pub fn handle_telemetry(&mut self, id: &SourceId, telemetry: Telemetry, now: Instant) -> Result<()> {
        let handle = self.handle(id)?;

        let event = match telemetry {
            Telemetry::TimeUpdate => MonitorEvent::TimeUpdate {
                position: handle.position(),
                paused: handle.is_paused(),
            },
            Telemetry::Progress => {
                debug!(source = %id, ranges = handle.buffered().len(), "Buffer progress");
                return Ok(());
            }
            Telemetry::Error => MonitorEvent::Error,
            Telemetry::Ended => MonitorEvent::Ended,
            Telemetry::Detached => MonitorEvent::Detached,
        };

        self.apply_event(id, &event, now);
        Ok(())
    }

    /// Route an external signal
    ///
    /// Source-specific effects apply to `target`, or to the active source
    /// when no target is given.
    pub async fn handle_signal(
        &mut self,
        signal: &Signal,
        target: Option<&SourceId>,
        now: Instant,
    ) -> Result<SignalAction> {
        let action = self.signals.route(signal);

        self.shared.broadcast_event(HealEvent::SignalReceived {
            kind: signal.kind.as_str().to_string(),
            message: truncate_message(&signal.message, self.config.heal.message_truncate_len),
            timestamp: time::now(),
        });

        let target = match target.or(self.selector.active()) {
            Some(id) => id.clone(),
            None => {
                debug!(kind = %signal.kind, "Signal has no target source");
                return Ok(action);
            }
        };
        if !self.sources.contains_key(&target) {
            return Err(Error::UnknownSource(target.to_string()));
        }

        match action {
            SignalAction::AdDetected => {
                self.shared.metrics.record_ad_detection();
                self.apply_event(&target, &MonitorEvent::Signal(SignalKind::AdDetected), now);
            }
            SignalAction::TriggerDetected => {
                self.apply_event(&target, &MonitorEvent::Signal(SignalKind::TriggerDetected), now);
            }
            SignalAction::DecoderRecovery => {
                self.apply_event(&target, &MonitorEvent::Signal(SignalKind::DecoderError), now);
            }
            SignalAction::AvSyncRecovery => {
                if self.av_sync.should_route(&signal.kind) {
                    self.recover_av_sync(&target, now).await?;
                }
            }
            SignalAction::Logged => {}
        }

        Ok(action)
    }

    /// One monitoring cycle at `now`
    ///
    /// Samples every source, runs stall checks, scores candidates, applies
    /// the selection, then recovers the active source if it needs it.
    pub async fn evaluate(&mut self, now: Instant) -> Result<EvaluationReport> {
        let ids: Vec<SourceId> = self.sources.keys().cloned().collect();
        for id in &ids {
            self.sample(id, now);
        }

        let candidates = self.score_candidates(now);
        let selection = self.selector.evaluate(&candidates, now);
        self.publish_selection(&selection);

        let active = self.selector.active().cloned();
        let recovery = match &active {
            Some(id) if self.needs_recovery(id) => Some(self.recover(id, now).await?),
            _ => None,
        };

        Ok(EvaluationReport {
            active,
            selection,
            recovery,
        })
    }

    fn sample(&mut self, id: &SourceId, now: Instant) {
        let Some(handle) = self.sources.get(id).map(|s| Arc::clone(&s.handle)) else {
            return;
        };

        if !handle.is_attached() {
            self.apply_event(id, &MonitorEvent::Detached, now);
            return;
        }
        if handle.is_ended() {
            self.apply_event(id, &MonitorEvent::Ended, now);
            return;
        }

        let update = MonitorEvent::TimeUpdate {
            position: handle.position(),
            paused: handle.is_paused(),
        };
        self.apply_event(id, &update, now);

        let exhausted = analyzer::is_exhausted(handle.as_ref());
        self.apply_event(id, &MonitorEvent::Tick { exhausted }, now);
    }

    fn score_candidates(&self, now: Instant) -> Vec<CandidateView> {
        let staleness_ms = self.config.candidate.staleness_ms;

        self.sources
            .iter()
            .map(|(id, source)| {
                let handle = source.handle.as_ref();
                let track = &source.track;
                let inputs = CandidateInputs {
                    id: id.clone(),
                    state: track.state,
                    paused: handle.is_paused(),
                    ended: handle.is_ended(),
                    attached: handle.is_attached(),
                    fallback_src: handle.uses_fallback_src(),
                    media_error: handle.has_media_error() || track.media_error,
                    ready_state: handle.ready_state(),
                    network_state: handle.network_state(),
                    exhausted: analyzer::is_exhausted(handle),
                    last_progress_at: track.last_progress_at,
                    progress_streak_ms: track.progress_streak_ms(),
                    reset_since_progress: track.reset_since_progress,
                };

                let record = score_candidate(&inputs, now, &self.config.candidate);
                let trust = get_trust_info(&record, staleness_ms);

                debug!(
                    source = %id,
                    score = record.score,
                    trusted = trust.trusted,
                    reason = trust.reason.as_str(),
                    "Candidate evaluated"
                );
                self.shared.broadcast_event(HealEvent::TrustEvaluated {
                    source_id: id.to_string(),
                    trusted: trust.trusted,
                    reason: trust.reason.as_str().to_string(),
                    score: record.score,
                    timestamp: time::now(),
                });

                CandidateView { record, trust }
            })
            .collect()
    }

    fn publish_selection(&self, selection: &Selection) {
        let event = match &selection.outcome {
            SelectionOutcome::Kept => return,
            SelectionOutcome::Adopted(to) => HealEvent::CandidateSwitched {
                from_id: None,
                to_id: to.to_string(),
                reason: "adopted".to_string(),
                timestamp: time::now(),
            },
            SelectionOutcome::Switched { from, to, reason } => HealEvent::CandidateSwitched {
                from_id: from.as_ref().map(|id| id.to_string()),
                to_id: to.to_string(),
                reason: reason.clone(),
                timestamp: time::now(),
            },
            SelectionOutcome::Suppressed { from, to, reason } => HealEvent::SwitchSuppressed {
                from_id: from.as_ref().map(|id| id.to_string()),
                to_id: to.to_string(),
                reason: reason.clone(),
                timestamp: time::now(),
            },
        };
        self.shared.broadcast_event(event);
    }

    /// Stalled, or in Error because of a decoder fault
    ///
    /// An Error reached through a fatal play failure is left alone: retrying
    /// cannot help, only progress or failover can.
    fn needs_recovery(&self, id: &SourceId) -> bool {
        self.sources.get(id).map_or(false, |s| match s.track.state {
            MonitorState::Stalled => true,
            MonitorState::Error => s.track.force_aggressive,
            _ => false,
        })
    }

    /// Run one recovery attempt for `id`
    ///
    /// Skips (without error) when the source is in backoff or another
    /// recovery holds the lock. The lock is held from strategy selection
    /// until the attempt finishes, and released on every exit path. An
    /// attempt still pending after the stale-lock timeout fails as aborted.
    pub async fn recover(&mut self, id: &SourceId, now: Instant) -> Result<RecoveryOutcome> {
        let handle = self.handle(id)?;

        if self.state_of(id) == Some(MonitorState::Dead) {
            return Ok(RecoveryOutcome::Skipped(SkipReason::NotRecoverable));
        }

        if let Some(source) = self.sources.get(id) {
            if self.backoff.should_skip(id, &source.backoff, now) {
                return Ok(RecoveryOutcome::Skipped(SkipReason::Backoff));
            }
        }

        let Some(guard) = self.lock.try_guard(now) else {
            debug!(source = %id, "Recovery skipped: lock held");
            return Ok(RecoveryOutcome::Skipped(SkipReason::LockBusy));
        };

        let held_since = Instant::now();
        let attempt_id = Uuid::new_v4();
        self.shared.broadcast_event(HealEvent::RecoveryLockAcquired {
            attempt_id,
            source_id: id.to_string(),
            forced: guard.forced(),
            timestamp: time::now(),
        });

        let strategy = match self.sources.get(id) {
            Some(source) if source.track.force_aggressive => StrategyKind::Aggressive,
            _ => strategy::select(handle.as_ref()),
        };

        self.shared.metrics.record_heal_attempt();
        info!(source = %id, %attempt_id, strategy = strategy.as_str(), "Recovery started");
        self.shared.broadcast_event(HealEvent::RecoveryStarted {
            attempt_id,
            source_id: id.to_string(),
            strategy: strategy.as_str().to_string(),
            timestamp: time::now(),
        });
        self.apply_event(id, &MonitorEvent::HealDispatched, now);

        let deadline = self.config.stale_lock_timeout();
        let attempt = async {
            match strategy {
                StrategyKind::Aggressive => (self.run_aggressive(id, &handle, now).await, false),
                StrategyKind::Standard | StrategyKind::AvSync => {
                    self.run_standard(id, &handle, now).await
                }
            }
        };
        let (result, healed_at_point) = match tokio::time::timeout(deadline, attempt).await {
            Ok(finished) => finished,
            Err(_) => (Err(attempt_timed_out(id, deadline)), false),
        };

        // Transitions use the decision time, not the time the awaits finished
        let outcome = self.finish_recovery(id, attempt_id, strategy, result, healed_at_point, now);

        let held_ms = elapsed_ms(held_since, Instant::now());
        drop(guard);
        self.shared.broadcast_event(HealEvent::RecoveryLockReleased {
            attempt_id,
            source_id: id.to_string(),
            held_ms,
            timestamp: time::now(),
        });

        Ok(outcome)
    }

    /// Heal at a heal point if there is one; otherwise back off and catch
    /// up to the live edge. Returns whether a heal point was used.
    async fn run_standard(
        &mut self,
        id: &SourceId,
        handle: &SourceHandle,
        now: Instant,
    ) -> (std::result::Result<(), PlayError>, bool) {
        if let Some(point) = analyzer::find_heal_point(handle.as_ref()) {
            debug!(source = %id, start = point.start, end = point.end, "Heal point found");
            let attempt = self.heal.attempt_seek_with_retry(handle.as_ref(), point).await;
            return (attempt.result, true);
        }

        self.apply_no_heal_point_backoff(id, "no_heal_point", now);

        let result = match strategy::execute_standard(handle.as_ref()).await {
            StrategyOutcome::Seeked { .. } => play::attempt_play(handle.as_ref()).await,
            StrategyOutcome::Aborted { reason } => Err(PlayError::aborted(reason.to_string())),
            StrategyOutcome::Failed(e) => Err(e),
            StrategyOutcome::Reset { .. } => Ok(()),
        };
        (result, false)
    }

    async fn run_aggressive(
        &mut self,
        id: &SourceId,
        handle: &SourceHandle,
        now: Instant,
    ) -> std::result::Result<(), PlayError> {
        self.shared.metrics.record_aggressive_recovery();
        self.apply_event(id, &MonitorEvent::ResetStarted, now);

        match strategy::execute_aggressive(handle.as_ref()).await {
            StrategyOutcome::Reset { target } => {
                self.apply_event(id, &MonitorEvent::ResetCompleted, now);
                // Nothing came back: same as having no heal point
                if target.is_none() {
                    self.apply_no_heal_point_backoff(id, "no_buffer", now);
                }
                play::attempt_play(handle.as_ref()).await
            }
            StrategyOutcome::Failed(e) => Err(e),
            StrategyOutcome::Aborted { reason } => Err(PlayError::aborted(reason.to_string())),
            StrategyOutcome::Seeked { .. } => play::attempt_play(handle.as_ref()).await,
        }
    }

    fn apply_no_heal_point_backoff(&mut self, id: &SourceId, reason: &str, now: Instant) {
        let Some(source) = self.sources.get_mut(id) else {
            return;
        };
        let applied = self.backoff.apply_backoff(id, &mut source.backoff, reason, now);

        self.shared.broadcast_event(HealEvent::BackoffApplied {
            source_id: id.to_string(),
            reason: reason.to_string(),
            no_heal_point_count: applied.count,
            delay_ms: applied.delay.as_millis() as u64,
            timestamp: time::now(),
        });
    }

    fn finish_recovery(
        &mut self,
        id: &SourceId,
        attempt_id: Uuid,
        strategy: StrategyKind,
        result: std::result::Result<(), PlayError>,
        healed_at_point: bool,
        now: Instant,
    ) -> RecoveryOutcome {
        let (success, detail) = match result {
            Ok(()) => {
                self.apply_event(id, &MonitorEvent::HealSucceeded, now);
                // Only a heal at a heal point clears the no-heal-point count
                if healed_at_point {
                    if let Some(source) = self.sources.get_mut(id) {
                        self.backoff.reset(id, &mut source.backoff);
                    }
                }
                info!(source = %id, %attempt_id, strategy = strategy.as_str(), "Recovery dispatched");
                (true, "resumed".to_string())
            }
            Err(error) => {
                let info = categorize(&error);
                if info.is_fatal {
                    warn!(source = %id, %attempt_id, error = %error, "Recovery failed (fatal)");
                } else {
                    info!(source = %id, %attempt_id, error = %error, "Recovery failed");
                }
                self.apply_event(id, &MonitorEvent::HealFailed { fatal: info.is_fatal }, now);
                (false, error.to_string())
            }
        };

        self.shared.broadcast_event(HealEvent::RecoveryFinished {
            attempt_id,
            source_id: id.to_string(),
            strategy: strategy.as_str().to_string(),
            success,
            detail: detail.clone(),
            timestamp: time::now(),
        });

        RecoveryOutcome::Completed {
            attempt_id,
            strategy,
            success,
            detail,
        }
    }

    async fn recover_av_sync(&mut self, id: &SourceId, now: Instant) -> Result<RecoveryOutcome> {
        let handle = self.handle(id)?;

        let Some(guard) = self.lock.try_guard(now) else {
            debug!(source = %id, "A/V sync recovery skipped: lock held");
            return Ok(RecoveryOutcome::Skipped(SkipReason::LockBusy));
        };

        let held_since = Instant::now();
        let attempt_id = Uuid::new_v4();
        let strategy = StrategyKind::AvSync;
        self.shared.broadcast_event(HealEvent::RecoveryLockAcquired {
            attempt_id,
            source_id: id.to_string(),
            forced: guard.forced(),
            timestamp: time::now(),
        });
        self.shared.metrics.record_heal_attempt();
        self.shared.broadcast_event(HealEvent::RecoveryStarted {
            attempt_id,
            source_id: id.to_string(),
            strategy: strategy.as_str().to_string(),
            timestamp: time::now(),
        });

        let deadline = self.config.stale_lock_timeout();
        let fix = self.av_sync.execute_recovery(handle.as_ref());
        let fixed = match tokio::time::timeout(deadline, fix).await {
            Ok(fixed) => fixed,
            Err(_) => {
                warn!(
                    source = %id,
                    %attempt_id,
                    deadline_ms = deadline.as_millis() as u64,
                    "A/V sync fix timed out"
                );
                false
            }
        };
        if fixed {
            self.shared.metrics.record_recovery_success();
        }
        let detail = if fixed { "resynced" } else { "fix_failed" }.to_string();
        self.shared.broadcast_event(HealEvent::RecoveryFinished {
            attempt_id,
            source_id: id.to_string(),
            strategy: strategy.as_str().to_string(),
            success: fixed,
            detail: detail.clone(),
            timestamp: time::now(),
        });

        let held_ms = elapsed_ms(held_since, Instant::now());
        drop(guard);
        self.shared.broadcast_event(HealEvent::RecoveryLockReleased {
            attempt_id,
            source_id: id.to_string(),
            held_ms,
            timestamp: time::now(),
        });

        Ok(RecoveryOutcome::Completed {
            attempt_id,
            strategy,
            success: fixed,
            detail,
        })
    }

    fn handle(&self, id: &SourceId) -> Result<SourceHandle> {
        self.sources
            .get(id)
            .map(|s| Arc::clone(&s.handle))
            .ok_or_else(|| Error::UnknownSource(id.to_string()))
    }

    /// Run the pure transition for `id` and publish what it produced
    fn apply_event(&mut self, id: &SourceId, event: &MonitorEvent, now: Instant) {
        let Some(source) = self.sources.get_mut(id) else {
            return;
        };

        let transition = source.track.apply(event, now, &self.config.stall);
        source.track = transition.track;

        for fact in &transition.facts {
            match fact {
                MonitorFact::StateChanged { from, to } => {
                    info!(source = %id, from = %from, to = %to, cause = event.tag(), "State changed");
                    self.shared.broadcast_event(HealEvent::StateChanged {
                        source_id: id.to_string(),
                        old_state: *from,
                        new_state: *to,
                        cause: event.tag().to_string(),
                        timestamp: time::now(),
                    });
                }
                MonitorFact::StallConfirmed {
                    stalled_ms,
                    window_ms,
                } => {
                    info!(source = %id, stalled_ms, window_ms, "Stall confirmed");
                }
                MonitorFact::ProgressResumed { from } => {
                    info!(source = %id, from = %from, "Progress resumed");
                    // A recovery only counts once playback actually advances
                    if *from == MonitorState::Healing {
                        self.shared.metrics.record_recovery_success();
                    }
                }
                MonitorFact::HealTimedOut { healing_ms } => {
                    warn!(source = %id, healing_ms, "Heal timed out without progress");
                }
                MonitorFact::MarkedDead { reason } => {
                    warn!(source = %id, reason, "Source marked dead");
                }
            }
        }
    }
}

/// Abort-class failure for an attempt that outlived `deadline`
fn attempt_timed_out(id: &SourceId, deadline: Duration) -> PlayError {
    warn!(source = %id, deadline_ms = deadline.as_millis() as u64, "Recovery attempt timed out");
    PlayError::aborted(format!(
        "recovery attempt interrupted after {} ms without settling",
        deadline.as_millis()
    ))
}

/// Drive `evaluate` on a fixed interval until `shutdown` resolves
pub async fn run_periodic<F>(
    monitor: &mut PlaybackMonitor,
    interval: Duration,
    shutdown: F,
) -> Result<()>
where
    F: std::future::Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Monitor loop shutting down");
                return Ok(());
            }
            tick = ticker.tick() => {
                monitor.evaluate(tick).await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferRange;
    use crate::source::PlaybackSource;
    use crate::sim::SimulatedSource;

    fn monitor() -> PlaybackMonitor {
        PlaybackMonitor::new(HealerConfig::default(), Arc::new(SharedState::default())).unwrap()
    }

    fn sim(ranges: Vec<BufferRange>, position: f64) -> Arc<SimulatedSource> {
        Arc::new(SimulatedSource::new(ranges, position))
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_sets_initial_active() {
        let mut monitor = monitor();
        let now = Instant::now();
        monitor
            .attach(SourceId::from("v1"), sim(vec![BufferRange::new(0.0, 30.0)], 0.0), now)
            .unwrap();
        monitor
            .attach(SourceId::from("v2"), sim(vec![BufferRange::new(0.0, 30.0)], 0.0), now)
            .unwrap();

        assert_eq!(monitor.active(), Some(&SourceId::from("v1")));
        assert_eq!(monitor.state_of(&SourceId::from("v2")), Some(MonitorState::Playing));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_attach_rejected() {
        let mut monitor = monitor();
        let now = Instant::now();
        let id = SourceId::from("v1");
        monitor.attach(id.clone(), sim(vec![], 0.0), now).unwrap();

        let err = monitor.attach(id.clone(), sim(vec![], 0.0), now).unwrap_err();
        assert!(matches!(err, Error::DuplicateSource(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_source_can_be_replaced() {
        let mut monitor = monitor();
        let now = Instant::now();
        let id = SourceId::from("v1");
        monitor.attach(id.clone(), sim(vec![], 0.0), now).unwrap();
        monitor.handle_telemetry(&id, Telemetry::Detached, now).unwrap();
        assert_eq!(monitor.state_of(&id), Some(MonitorState::Dead));

        monitor.attach(id.clone(), sim(vec![], 0.0), now).unwrap();
        assert_eq!(monitor.state_of(&id), Some(MonitorState::Playing));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_source_telemetry() {
        let mut monitor = monitor();
        let err = monitor
            .handle_telemetry(&SourceId::from("nope"), Telemetry::Error, Instant::now())
            .unwrap_err();
        assert!(matches!(err, Error::UnknownSource(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_contention_skips_recovery() {
        let mut monitor = monitor();
        let now = Instant::now();
        let id = SourceId::from("v1");
        monitor
            .attach(id.clone(), sim(vec![BufferRange::new(0.0, 10.0)], 5.0), now)
            .unwrap();

        let _held = monitor.lock().try_guard(now).unwrap();
        let outcome = monitor.recover(&id, now).await.unwrap();
        assert_eq!(outcome, RecoveryOutcome::Skipped(SkipReason::LockBusy));
        assert_eq!(monitor.shared().metrics.snapshot().heal_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_releases_lock_on_failure() {
        let mut monitor = monitor();
        let now = Instant::now();
        let id = SourceId::from("v1");
        let source = sim(
            vec![BufferRange::new(0.0, 10.0), BufferRange::new(12.0, 20.0)],
            9.9,
        );
        source.queue_play_failures([PlayError::not_allowed("autoplay blocked")]);
        monitor.attach(id.clone(), source, now).unwrap();

        let outcome = monitor.recover(&id, now).await.unwrap();
        assert!(!outcome.succeeded());
        assert!(!monitor.lock().is_locked());
        assert_eq!(monitor.state_of(&id), Some(MonitorState::Error));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heal_point_recovery_succeeds() {
        let mut monitor = monitor();
        let now = Instant::now();
        let id = SourceId::from("v1");
        let source = sim(
            vec![BufferRange::new(0.0, 10.0), BufferRange::new(12.0, 20.0)],
            9.9,
        );
        monitor.attach(id.clone(), source.clone(), now).unwrap();

        let outcome = monitor.recover(&id, now).await.unwrap();
        assert!(outcome.succeeded());
        assert!((source.position() - 12.5).abs() < 1e-9);
        assert_eq!(monitor.state_of(&id), Some(MonitorState::Healing));

        // Not a success until playback moves
        let metrics = monitor.shared().metrics.snapshot();
        assert_eq!(metrics.recoveries_succeeded, 0);
        assert_eq!(metrics.heal_attempts, 1);

        monitor.handle_telemetry(&id, Telemetry::TimeUpdate, now).unwrap();
        source.advance(0.25);
        let later = now + Duration::from_millis(250);
        monitor.handle_telemetry(&id, Telemetry::TimeUpdate, later).unwrap();

        assert_eq!(monitor.state_of(&id), Some(MonitorState::Playing));
        assert_eq!(monitor.shared().metrics.snapshot().recoveries_succeeded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_heal_point_applies_backoff() {
        let mut monitor = monitor();
        let now = Instant::now();
        let id = SourceId::from("v1");
        monitor
            .attach(id.clone(), sim(vec![BufferRange::new(0.0, 10.0)], 9.8), now)
            .unwrap();

        monitor.recover(&id, now).await.unwrap();
        assert_eq!(monitor.backoff_of(&id).unwrap().no_heal_point_count, 1);

        // Inside the backoff window the next attempt is skipped
        let outcome = monitor
            .recover(&id, now + Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(outcome, RecoveryOutcome::Skipped(SkipReason::Backoff));
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_published_for_attempt() {
        let mut monitor = monitor();
        let mut rx = monitor.shared().subscribe_events();
        let now = Instant::now();
        let id = SourceId::from("v1");
        monitor
            .attach(
                id.clone(),
                sim(vec![BufferRange::new(0.0, 10.0), BufferRange::new(12.0, 20.0)], 9.9),
                now,
            )
            .unwrap();
        monitor.recover(&id, now).await.unwrap();

        let mut tags = Vec::new();
        while let Ok(event) = rx.try_recv() {
            tags.push(event.tag());
        }
        assert_eq!(
            tags,
            vec![
                "source_attached",
                "lock_acquired",
                "recovery_started",
                "state_changed",
                "recovery_finished",
                "lock_released",
            ]
        );
    }
}
