//! Candidate score records
//!
//! Recomputed every evaluation cycle from the source's monitor state and a
//! snapshot of what the source reports. Never persisted.

use serde::Serialize;
use std::collections::BTreeSet;
use tokio::time::Instant;

use crate::config::CandidateConfig;
use crate::monitor::state::MonitorState;
use crate::source::{NetworkState, ReadyState, SourceId};
use streamheal_common::time::elapsed_ms;

/// Source-level facts attached to a score record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateReason {
    FallbackSrc,
    Ended,
    NotInDom,
    /// Reloaded and not yet progressed since
    Reset,
    ResetPending,
    ErrorState,
    /// Source reports a media error
    Error,
    Paused,
    Stalled,
    Healing,
    BufferExhausted,
    NoSource,
    LowReadyState,
}

impl CandidateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateReason::FallbackSrc => "fallback_src",
            CandidateReason::Ended => "ended",
            CandidateReason::NotInDom => "not_in_dom",
            CandidateReason::Reset => "reset",
            CandidateReason::ResetPending => "reset_pending",
            CandidateReason::ErrorState => "error_state",
            CandidateReason::Error => "error",
            CandidateReason::Paused => "paused",
            CandidateReason::Stalled => "stalled",
            CandidateReason::Healing => "healing",
            CandidateReason::BufferExhausted => "buffer_exhausted",
            CandidateReason::NoSource => "no_source",
            CandidateReason::LowReadyState => "low_ready_state",
        }
    }

    /// Structural facts that make a source unusable regardless of recency
    pub fn is_disqualifying(&self) -> bool {
        matches!(
            self,
            CandidateReason::FallbackSrc
                | CandidateReason::Ended
                | CandidateReason::NotInDom
                | CandidateReason::Reset
                | CandidateReason::ResetPending
                | CandidateReason::ErrorState
                | CandidateReason::Error
        )
    }
}

/// Everything scoring needs, gathered once per cycle
#[derive(Debug, Clone)]
pub struct CandidateInputs {
    pub id: SourceId,
    pub state: MonitorState,
    pub paused: bool,
    pub ended: bool,
    pub attached: bool,
    pub fallback_src: bool,
    pub media_error: bool,
    pub ready_state: ReadyState,
    pub network_state: NetworkState,
    pub exhausted: bool,
    pub last_progress_at: Option<Instant>,
    pub progress_streak_ms: u64,
    pub reset_since_progress: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateScoreRecord {
    pub id: SourceId,
    pub state: MonitorState,
    pub score: f64,
    pub progress_ago_ms: Option<u64>,
    pub progress_streak_ms: u64,
    pub progress_eligible: bool,
    pub dead_candidate: bool,
    pub reasons: BTreeSet<CandidateReason>,
}

impl CandidateScoreRecord {
    pub fn has_disqualifying_reason(&self) -> bool {
        self.reasons.iter().any(|r| r.is_disqualifying())
    }
}

const DEAD_SCORE: f64 = -100.0;
const MAX_STREAK_BONUS: f64 = 10.0;
const MAX_STALENESS_PENALTY: f64 = 10.0;

fn collect_reasons(inputs: &CandidateInputs) -> BTreeSet<CandidateReason> {
    let mut reasons = BTreeSet::new();
    let mut add = |cond: bool, reason: CandidateReason| {
        if cond {
            reasons.insert(reason);
        }
    };

    add(inputs.fallback_src, CandidateReason::FallbackSrc);
    add(inputs.ended, CandidateReason::Ended);
    add(!inputs.attached, CandidateReason::NotInDom);
    add(inputs.reset_since_progress, CandidateReason::Reset);
    add(inputs.state == MonitorState::ResetPending, CandidateReason::ResetPending);
    add(inputs.state == MonitorState::Error, CandidateReason::ErrorState);
    add(inputs.media_error, CandidateReason::Error);
    add(inputs.paused, CandidateReason::Paused);
    add(inputs.state == MonitorState::Stalled, CandidateReason::Stalled);
    add(inputs.state == MonitorState::Healing, CandidateReason::Healing);
    add(inputs.exhausted, CandidateReason::BufferExhausted);
    add(inputs.network_state == NetworkState::NoSource, CandidateReason::NoSource);
    add(inputs.ready_state < ReadyState::HaveCurrentData, CandidateReason::LowReadyState);
    reasons
}

fn state_base(state: MonitorState) -> f64 {
    match state {
        MonitorState::Playing => 10.0,
        MonitorState::Healing => 4.0,
        MonitorState::Stalled => 2.0,
        MonitorState::ResetPending => 0.0,
        MonitorState::Error => -5.0,
        MonitorState::Dead => DEAD_SCORE,
    }
}

fn ready_bonus(ready: ReadyState) -> f64 {
    match ready {
        ReadyState::HaveEnoughData => 2.0,
        ReadyState::HaveFutureData => 1.5,
        ReadyState::HaveCurrentData => 1.0,
        _ => 0.0,
    }
}

/// Build the score record for one candidate at `now`
pub fn score_candidate(
    inputs: &CandidateInputs,
    now: Instant,
    config: &CandidateConfig,
) -> CandidateScoreRecord {
    let reasons = collect_reasons(inputs);
    let progress_ago_ms = inputs.last_progress_at.map(|at| elapsed_ms(at, now));
    let dead_candidate = inputs.state == MonitorState::Dead || !inputs.attached || inputs.ended;
    let progress_eligible =
        !dead_candidate && inputs.progress_streak_ms >= config.min_progress_streak_ms;

    let score = if dead_candidate {
        DEAD_SCORE
    } else {
        let streak_bonus = (inputs.progress_streak_ms as f64 / 1000.0).min(MAX_STREAK_BONUS);
        let staleness_penalty = progress_ago_ms
            .map(|ms| (ms as f64 / 2000.0).min(MAX_STALENESS_PENALTY))
            .unwrap_or(MAX_STALENESS_PENALTY);
        let reason_penalty: f64 = reasons
            .iter()
            .map(|r| if r.is_disqualifying() { 10.0 } else { 3.0 })
            .sum();

        state_base(inputs.state) + streak_bonus + ready_bonus(inputs.ready_state)
            - staleness_penalty
            - reason_penalty
    };

    CandidateScoreRecord {
        id: inputs.id.clone(),
        state: inputs.state,
        score,
        progress_ago_ms,
        progress_streak_ms: inputs.progress_streak_ms,
        progress_eligible,
        dead_candidate,
        reasons,
    }
}
