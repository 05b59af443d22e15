//! Candidate selector
//!
//! Owns the active source id and applies policy decisions, subject to
//! probation and to the rule that a dead candidate is never activated.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use super::decision::{
    decide, preferred_candidate, CandidateDecision, CandidateView, DecisionContext,
    ObserveOnlyPolicy, SwitchAction, SwitchPolicy, TrustedFailoverPolicy,
};
use super::probation::ProbationWindow;
use crate::config::CandidateConfig;
use crate::source::SourceId;

/// What the selector did with a decision
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionOutcome {
    Kept,
    /// No active source yet; preferred candidate adopted without probation
    Adopted(SourceId),
    Switched {
        from: Option<SourceId>,
        to: SourceId,
        reason: String,
    },
    Suppressed {
        from: Option<SourceId>,
        to: SourceId,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Selection {
    pub decision: CandidateDecision,
    pub outcome: SelectionOutcome,
}

/// Observe-only unless `failover` is enabled
pub fn policy_for(config: &CandidateConfig) -> Box<dyn SwitchPolicy> {
    if config.failover {
        Box::new(TrustedFailoverPolicy::new(config.switch_margin))
    } else {
        Box::new(ObserveOnlyPolicy)
    }
}

pub struct CandidateSelector {
    policy: Box<dyn SwitchPolicy>,
    probation: ProbationWindow,
    active: Option<SourceId>,
}

impl CandidateSelector {
    pub fn new(policy: Box<dyn SwitchPolicy>, probation_window: Duration) -> Self {
        Self {
            policy,
            probation: ProbationWindow::new(probation_window),
            active: None,
        }
    }

    pub fn from_config(config: &CandidateConfig) -> Self {
        Self::new(
            policy_for(config),
            Duration::from_millis(config.probation_window_ms),
        )
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Swap the switch policy; the active source and probation are kept
    pub fn set_policy(&mut self, policy: Box<dyn SwitchPolicy>) {
        info!(from = self.policy.name(), to = policy.name(), "Switch policy changed");
        self.policy = policy;
    }

    pub fn active(&self) -> Option<&SourceId> {
        self.active.as_ref()
    }

    /// Set the active source directly (initial attach); no probation
    pub fn set_active(&mut self, id: SourceId) {
        info!(source = %id, "Active source set");
        self.active = Some(id);
    }

    /// Forget the active source if it is `id`
    pub fn clear_if_active(&mut self, id: &SourceId) -> bool {
        if self.active.as_ref() == Some(id) {
            self.active = None;
            true
        } else {
            false
        }
    }

    pub fn probation_active(&mut self, now: Instant) -> bool {
        self.probation.is_active(now)
    }

    pub fn evaluate(&mut self, candidates: &[CandidateView], now: Instant) -> Selection {
        let decision = {
            let ctx = DecisionContext {
                active_id: self.active.as_ref(),
                candidates,
            };
            decide(&ctx, self.policy.as_ref())
        };

        if self.active.is_none() {
            if let Some(preferred) = preferred_candidate(candidates, None) {
                let id = preferred.id().clone();
                info!(source = %id, "Adopted preferred candidate as active");
                self.active = Some(id.clone());
                return Selection {
                    decision,
                    outcome: SelectionOutcome::Adopted(id),
                };
            }
        }

        let outcome = match (decision.action, decision.to_id.clone()) {
            (SwitchAction::Switch, Some(to)) => self.apply_switch(&decision, to, candidates, now),
            _ => SelectionOutcome::Kept,
        };

        Selection { decision, outcome }
    }

    fn apply_switch(
        &mut self,
        decision: &CandidateDecision,
        to: SourceId,
        candidates: &[CandidateView],
        now: Instant,
    ) -> SelectionOutcome {
        let from = self.active.clone();

        let target_dead = candidates
            .iter()
            .find(|c| c.id() == &to)
            .map_or(true, |c| c.record.dead_candidate);
        if target_dead {
            debug!(to = %to, "Switch target is dead, ignoring");
            return SelectionOutcome::Suppressed {
                from,
                to,
                reason: "target_dead".to_string(),
            };
        }

        if self.probation.is_active(now) {
            debug!(
                to = %to,
                probation = self.probation.reason().unwrap_or(""),
                "Switch suppressed by probation"
            );
            return SelectionOutcome::Suppressed {
                from,
                to,
                reason: "probation".to_string(),
            };
        }

        let from_label = from.as_ref().map_or("none", |id| id.as_str());
        info!(
            from = from_label,
            to = %to,
            reason = %decision.reason,
            policy = self.policy.name(),
            "Switching active source"
        );
        self.probation
            .activate(&format!("switch:{}->{}", from_label, to), now);
        self.active = Some(to.clone());

        SelectionOutcome::Switched {
            from,
            to,
            reason: decision.reason.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::decision::tests::view;

    fn selector() -> CandidateSelector {
        CandidateSelector::from_config(&CandidateConfig {
            failover: true,
            ..CandidateConfig::default()
        })
    }

    #[test]
    fn test_default_config_is_observe_only() {
        let selector = CandidateSelector::from_config(&CandidateConfig::default());
        assert_eq!(selector.policy_name(), "observe_only");
    }

    #[test]
    fn test_set_policy_keeps_active() {
        let mut selector = CandidateSelector::from_config(&CandidateConfig::default());
        selector.set_active(SourceId::from("v1"));

        selector.set_policy(Box::new(TrustedFailoverPolicy::new(1.0)));
        assert_eq!(selector.policy_name(), "trusted_failover");
        assert_eq!(selector.active(), Some(&SourceId::from("v1")));
    }

    #[test]
    fn test_adopts_initial_active_without_probation() {
        let mut selector = selector();
        let now = Instant::now();
        let candidates = vec![view("v1", 10.0, true, false)];

        let selection = selector.evaluate(&candidates, now);
        assert_eq!(selection.outcome, SelectionOutcome::Adopted(SourceId::from("v1")));
        assert!(!selector.probation_active(now));
    }

    #[test]
    fn test_switch_opens_probation() {
        let mut selector = selector();
        let now = Instant::now();
        selector.set_active(SourceId::from("v1"));

        let candidates = vec![view("v1", 2.0, false, false), view("v2", 17.0, true, false)];
        let selection = selector.evaluate(&candidates, now);

        assert!(matches!(selection.outcome, SelectionOutcome::Switched { .. }));
        assert_eq!(selector.active(), Some(&SourceId::from("v2")));
        assert!(selector.probation_active(now));
    }

    #[test]
    fn test_probation_suppresses_switch_back() {
        let mut selector = selector();
        let t0 = Instant::now();
        selector.set_active(SourceId::from("v1"));

        let first = vec![view("v1", 2.0, false, false), view("v2", 17.0, true, false)];
        selector.evaluate(&first, t0);

        // v2 degrades right away; v1 looks good again
        let second = vec![view("v1", 17.0, true, false), view("v2", 2.0, false, false)];
        let t1 = t0 + Duration::from_secs(1);
        let selection = selector.evaluate(&second, t1);

        match selection.outcome {
            SelectionOutcome::Suppressed { reason, .. } => assert_eq!(reason, "probation"),
            other => panic!("expected suppression, got {:?}", other),
        }
        assert_eq!(selector.active(), Some(&SourceId::from("v2")));

        // After the window, the switch goes through
        let t2 = t0 + Duration::from_millis(5001);
        let selection = selector.evaluate(&second, t2);
        assert!(matches!(selection.outcome, SelectionOutcome::Switched { .. }));
        assert_eq!(selector.active(), Some(&SourceId::from("v1")));
    }

    #[test]
    fn test_never_activates_dead_candidate() {
        struct AlwaysSwitchTo(&'static str);

        impl SwitchPolicy for AlwaysSwitchTo {
            fn name(&self) -> &'static str {
                "always_switch"
            }

            fn decide(&self, ctx: &DecisionContext<'_>) -> CandidateDecision {
                CandidateDecision {
                    action: SwitchAction::Switch,
                    reason: "forced".to_string(),
                    from_id: ctx.active_id.cloned(),
                    to_id: Some(SourceId::from(self.0)),
                    preferred: None,
                    scores: ctx.candidates.to_vec(),
                }
            }
        }

        let mut selector =
            CandidateSelector::new(Box::new(AlwaysSwitchTo("v2")), Duration::from_secs(5));
        selector.set_active(SourceId::from("v1"));

        let candidates = vec![view("v1", 10.0, true, false), view("v2", 20.0, true, true)];
        let selection = selector.evaluate(&candidates, Instant::now());

        match selection.outcome {
            SelectionOutcome::Suppressed { reason, .. } => assert_eq!(reason, "target_dead"),
            other => panic!("expected suppression, got {:?}", other),
        }
        assert_eq!(selector.active(), Some(&SourceId::from("v1")));
    }

    #[test]
    fn test_observe_only_keeps_active() {
        let config = CandidateConfig {
            failover: false,
            ..CandidateConfig::default()
        };
        let mut selector = CandidateSelector::from_config(&config);
        selector.set_active(SourceId::from("v1"));

        let candidates = vec![view("v1", 2.0, false, false), view("v2", 17.0, true, false)];
        let selection = selector.evaluate(&candidates, Instant::now());

        assert_eq!(selection.outcome, SelectionOutcome::Kept);
        assert_eq!(selection.decision.preferred, Some(SourceId::from("v2")));
        assert_eq!(selector.policy_name(), "observe_only");
    }

    #[test]
    fn test_clear_if_active() {
        let mut selector = selector();
        selector.set_active(SourceId::from("v1"));
        assert!(!selector.clear_if_active(&SourceId::from("v2")));
        assert!(selector.clear_if_active(&SourceId::from("v1")));
        assert!(selector.active().is_none());
    }
}
