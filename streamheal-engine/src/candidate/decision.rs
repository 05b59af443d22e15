//! Candidate decision
//!
//! Given the active source and this cycle's scored candidates, a
//! [`SwitchPolicy`] decides whether to switch. The default policy only
//! observes; [`TrustedFailoverPolicy`] fails over to a trusted candidate
//! when the active one is dead or untrusted.

use serde::Serialize;

use super::score::CandidateScoreRecord;
use super::trust::TrustInfo;
use crate::source::SourceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchAction {
    None,
    Switch,
}

/// A scored candidate with its trust verdict
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateView {
    #[serde(flatten)]
    pub record: CandidateScoreRecord,
    pub trust: TrustInfo,
}

impl CandidateView {
    pub fn id(&self) -> &SourceId {
        &self.record.id
    }

    /// Trusted and not dead
    pub fn is_selectable(&self) -> bool {
        self.trust.trusted && !self.record.dead_candidate
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DecisionContext<'a> {
    pub active_id: Option<&'a SourceId>,
    pub candidates: &'a [CandidateView],
}

impl<'a> DecisionContext<'a> {
    pub fn active(&self) -> Option<&'a CandidateView> {
        let active_id = self.active_id?;
        self.candidates.iter().find(|c| c.id() == active_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateDecision {
    pub action: SwitchAction,
    pub reason: String,
    pub from_id: Option<SourceId>,
    pub to_id: Option<SourceId>,
    pub preferred: Option<SourceId>,
    pub scores: Vec<CandidateView>,
}

impl CandidateDecision {
    fn keep(ctx: &DecisionContext<'_>, reason: impl Into<String>) -> Self {
        Self {
            action: SwitchAction::None,
            reason: reason.into(),
            from_id: ctx.active_id.cloned(),
            to_id: None,
            preferred: preferred_candidate(ctx.candidates, None).map(|c| c.id().clone()),
            scores: ctx.candidates.to_vec(),
        }
    }
}

/// Highest-scoring selectable candidate, optionally excluding one id.
/// Ties go to the lower id so the choice is stable across cycles.
pub fn preferred_candidate<'a>(
    candidates: &'a [CandidateView],
    exclude: Option<&SourceId>,
) -> Option<&'a CandidateView> {
    candidates
        .iter()
        .filter(|c| c.is_selectable())
        .filter(|c| exclude.map_or(true, |id| c.id() != id))
        .max_by(|a, b| {
            a.record
                .score
                .total_cmp(&b.record.score)
                .then_with(|| b.id().cmp(a.id()))
        })
}

/// Pluggable switching decision
pub trait SwitchPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    fn decide(&self, ctx: &DecisionContext<'_>) -> CandidateDecision;
}

/// Never switches; reports the preferred candidate and the full scores
#[derive(Debug, Clone, Copy, Default)]
pub struct ObserveOnlyPolicy;

impl SwitchPolicy for ObserveOnlyPolicy {
    fn name(&self) -> &'static str {
        "observe_only"
    }

    fn decide(&self, ctx: &DecisionContext<'_>) -> CandidateDecision {
        CandidateDecision::keep(ctx, "observe_only")
    }
}

/// Fails over when the active candidate is dead or untrusted and a
/// different trusted candidate beats it by at least `margin`
#[derive(Debug, Clone, Copy)]
pub struct TrustedFailoverPolicy {
    pub margin: f64,
}

impl TrustedFailoverPolicy {
    pub fn new(margin: f64) -> Self {
        Self { margin }
    }
}

impl Default for TrustedFailoverPolicy {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl SwitchPolicy for TrustedFailoverPolicy {
    fn name(&self) -> &'static str {
        "trusted_failover"
    }

    fn decide(&self, ctx: &DecisionContext<'_>) -> CandidateDecision {
        let active = ctx.active();

        if let Some(active) = active {
            if active.is_selectable() {
                return CandidateDecision::keep(ctx, "active_trusted");
            }
        }

        let Some(target) = preferred_candidate(ctx.candidates, ctx.active_id) else {
            return CandidateDecision::keep(ctx, "no_trusted_alternative");
        };

        let reason = match active {
            None => "no_active".to_string(),
            Some(a) if a.record.dead_candidate => "active_dead".to_string(),
            Some(a) => {
                // Hysteresis only applies against a live active candidate
                if target.record.score < a.record.score + self.margin {
                    return CandidateDecision::keep(ctx, "margin_not_met");
                }
                format!("active_untrusted:{}", a.trust.reason.as_str())
            }
        };

        CandidateDecision {
            action: SwitchAction::Switch,
            reason,
            from_id: ctx.active_id.cloned(),
            to_id: Some(target.id().clone()),
            preferred: Some(target.id().clone()),
            scores: ctx.candidates.to_vec(),
        }
    }
}

pub fn decide(ctx: &DecisionContext<'_>, policy: &dyn SwitchPolicy) -> CandidateDecision {
    policy.decide(ctx)
}
