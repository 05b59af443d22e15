//! Timestamp utilities
//!
//! Wall-clock timestamps (chrono) label events. Decisions use the
//! monotonic `tokio::time::Instant`, read once per decision and passed down,
//! so tests can drive them with a paused clock.

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Milliseconds from `earlier` to `now`, zero if `earlier` is in the future
pub fn elapsed_ms(earlier: Instant, now: Instant) -> u64 {
    now.saturating_duration_since(earlier).as_millis() as u64
}
