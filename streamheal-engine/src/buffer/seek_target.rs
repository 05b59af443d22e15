//! Seek target validation and safe-offset calculation

use thiserror::Error;

use super::{BufferRange, HealPoint};
use crate::source::PlaybackSource;

/// Heal points shorter than this are targeted at their midpoint
const MIDPOINT_SPAN_SECS: f64 = 1.0;

/// Preferred offset into fresh content
const PREFERRED_OFFSET_SECS: f64 = 0.5;

/// Why a seek target was rejected
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekRejection {
    #[error("source has no buffered ranges")]
    NoBuffer,
    #[error("target is outside every buffered range")]
    TargetNotInBuffer,
}

/// A target that lies inside buffered content
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidSeek {
    pub range: BufferRange,
    /// Seconds of buffered content after the target
    pub headroom: f64,
}

pub fn validate_at(ranges: &[BufferRange], target: f64) -> Result<ValidSeek, SeekRejection> {
    if ranges.is_empty() {
        return Err(SeekRejection::NoBuffer);
    }

    ranges
        .iter()
        .find(|r| r.contains(target))
        .map(|r| ValidSeek {
            range: *r,
            headroom: r.end - target,
        })
        .ok_or(SeekRejection::TargetNotInBuffer)
}

pub fn validate(source: &dyn PlaybackSource, target: f64) -> Result<ValidSeek, SeekRejection> {
    validate_at(&source.buffered(), target)
}

/// Seek target inside a heal point
///
/// Short spans use the midpoint. Longer spans land near the start of the
/// fresh content while keeping at least one second before the end, so the
/// next position update does not immediately run off the buffer.
pub fn calculate_safe_target(heal_point: &HealPoint) -> f64 {
    let span = heal_point.span();
    if span < MIDPOINT_SPAN_SECS {
        heal_point.start + span / 2.0
    } else {
        heal_point.start + PREFERRED_OFFSET_SECS.min(span - MIDPOINT_SPAN_SECS)
    }
}
