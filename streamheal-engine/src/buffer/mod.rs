//! Buffered-range analysis and seek target calculation

pub mod analyzer;
pub mod seek_target;

use serde::{Deserialize, Serialize};

pub use analyzer::{BufferAnalysis, BufferHealth};
pub use seek_target::{SeekRejection, ValidSeek};

/// One buffered time range `[start, end)` in seconds
///
/// Ranges reported by a source are assumed sorted and non-overlapping.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BufferRange {
    pub start: f64,
    pub end: f64,
}

impl BufferRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn span(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }

    /// Half-open containment: `start <= t < end`
    pub fn contains(&self, t: f64) -> bool {
        t >= self.start && t < self.end
    }
}

/// Buffered range chosen as a recovery target
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealPoint {
    pub start: f64,
    pub end: f64,
}

impl HealPoint {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn span(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }
}

impl From<BufferRange> for HealPoint {
    fn from(range: BufferRange) -> Self {
        Self {
            start: range.start,
            end: range.end,
        }
    }
}
