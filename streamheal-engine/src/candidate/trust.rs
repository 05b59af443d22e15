//! Candidate trust
//!
//! Checks run in order and the first match wins:
//! 1. not progress-eligible
//! 2. any disqualifying reason
//! 3. last progress older than the staleness threshold
//! 4. otherwise trusted

use serde::Serialize;

use super::score::CandidateScoreRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustReason {
    Trusted,
    ProgressIneligible,
    BadReason,
    ProgressStale,
}

impl TrustReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustReason::Trusted => "trusted",
            TrustReason::ProgressIneligible => "progress_ineligible",
            TrustReason::BadReason => "bad_reason",
            TrustReason::ProgressStale => "progress_stale",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrustInfo {
    pub trusted: bool,
    pub reason: TrustReason,
}

impl TrustInfo {
    fn untrusted(reason: TrustReason) -> Self {
        Self {
            trusted: false,
            reason,
        }
    }
}

pub fn get_trust_info(record: &CandidateScoreRecord, staleness_ms: u64) -> TrustInfo {
    if !record.progress_eligible {
        return TrustInfo::untrusted(TrustReason::ProgressIneligible);
    }

    if record.has_disqualifying_reason() {
        return TrustInfo::untrusted(TrustReason::BadReason);
    }

    match record.progress_ago_ms {
        Some(ago) if ago <= staleness_ms => TrustInfo {
            trusted: true,
            reason: TrustReason::Trusted,
        },
        _ => TrustInfo::untrusted(TrustReason::ProgressStale),
    }
}
