//! Buffer analyzer
//!
//! Computes buffered ranges, exhaustion state and heal points for a source.
//! The `*_at` functions are pure over `(ranges, position)`; the source-facing
//! wrappers read the source once and delegate.

use serde::Serialize;

use super::{BufferRange, HealPoint};
use crate::source::PlaybackSource;

/// Remaining seconds in the containing range below which the buffer counts as exhausted
pub const EXHAUSTED_REMAINING_SECS: f64 = 0.5;

/// A heal point must start at least this far past the playhead
pub const HEAL_GAP_EPSILON_SECS: f64 = 0.1;

/// Shortest range accepted as a heal point
pub const MIN_HEAL_SPAN_SECS: f64 = 0.5;

/// Severity of the gap between the playhead and playable content
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferHealth {
    /// < 1000ms
    Minor,
    /// 1000-3000ms
    Moderate,
    /// 3000-10000ms
    Severe,
    /// > 10000ms, or nothing buffered at all
    Critical,
}

impl BufferHealth {
    pub fn from_gap_ms(gap_ms: u64) -> Self {
        match gap_ms {
            0..=999 => BufferHealth::Minor,
            1000..=2999 => BufferHealth::Moderate,
            3000..=10000 => BufferHealth::Severe,
            _ => BufferHealth::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BufferHealth::Minor => "minor",
            BufferHealth::Moderate => "moderate",
            BufferHealth::Severe => "severe",
            BufferHealth::Critical => "critical",
        }
    }
}

/// Result of `analyze`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BufferAnalysis {
    pub needs_aggressive: bool,
    pub buffer_health: BufferHealth,
    /// Seconds buffered ahead of the playhead in its containing range
    pub buffer_size: f64,
    /// Gap to playable content; None when nothing is buffered
    pub gap_ms: Option<u64>,
}

/// Range containing `position`, if any
pub fn containing_range(ranges: &[BufferRange], position: f64) -> Option<BufferRange> {
    ranges.iter().copied().find(|r| r.contains(position))
}

pub fn exhausted_at(ranges: &[BufferRange], position: f64) -> bool {
    match containing_range(ranges, position) {
        // Outside every range: treat as exhausted
        None => true,
        Some(range) => range.end - position < EXHAUSTED_REMAINING_SECS,
    }
}

pub fn heal_point_at(ranges: &[BufferRange], position: f64) -> Option<HealPoint> {
    let current_end = containing_range(ranges, position)
        .map(|r| r.end)
        .unwrap_or(position);

    ranges
        .iter()
        .find(|r| {
            r.start >= current_end
                && r.start > position + HEAL_GAP_EPSILON_SECS
                && r.span() >= MIN_HEAL_SPAN_SECS
        })
        .map(|r| HealPoint::from(*r))
}

pub fn analyze_at(ranges: &[BufferRange], position: f64) -> BufferAnalysis {
    if ranges.is_empty() {
        return BufferAnalysis {
            needs_aggressive: true,
            buffer_health: BufferHealth::Critical,
            buffer_size: 0.0,
            gap_ms: None,
        };
    }

    let containing = containing_range(ranges, position);
    let buffer_size = containing.map(|r| r.end - position).unwrap_or(0.0);
    let next_ahead = ranges.iter().find(|r| r.start > position);

    let gap_secs = match (containing, next_ahead) {
        (Some(_), _) if !exhausted_at(ranges, position) => 0.0,
        (_, Some(next)) => next.start - position,
        // Starving at the live edge: ordinary
        (Some(_), None) => 0.0,
        (None, None) => {
            let last_end = ranges.last().map(|r| r.end).unwrap_or(position);
            (position - last_end).max(0.0)
        }
    };

    let gap_ms = (gap_secs * 1000.0).round() as u64;
    let buffer_health = BufferHealth::from_gap_ms(gap_ms);

    BufferAnalysis {
        needs_aggressive: buffer_health >= BufferHealth::Severe,
        buffer_health,
        buffer_size,
        gap_ms: Some(gap_ms),
    }
}

pub fn get_ranges(source: &dyn PlaybackSource) -> Vec<BufferRange> {
    source.buffered()
}

pub fn is_exhausted(source: &dyn PlaybackSource) -> bool {
    exhausted_at(&source.buffered(), source.position())
}

pub fn find_heal_point(source: &dyn PlaybackSource) -> Option<HealPoint> {
    heal_point_at(&source.buffered(), source.position())
}

pub fn analyze(source: &dyn PlaybackSource) -> BufferAnalysis {
    analyze_at(&source.buffered(), source.position())
}
