//! Multi-source candidate scoring, trust, and failover

pub mod decision;
pub mod probation;
pub mod score;
pub mod selector;
pub mod trust;

pub use decision::{
    decide, CandidateDecision, CandidateView, DecisionContext, ObserveOnlyPolicy, SwitchAction,
    SwitchPolicy, TrustedFailoverPolicy,
};
pub use probation::ProbationWindow;
pub use score::{score_candidate, CandidateInputs, CandidateReason, CandidateScoreRecord};
pub use selector::{policy_for, CandidateSelector, Selection, SelectionOutcome};
pub use trust::{get_trust_info, TrustInfo, TrustReason};
