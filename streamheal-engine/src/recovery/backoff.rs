//! Backoff for repeated "no heal point" outcomes
//!
//! Prevents tight retry loops against a source with no recoverable content
//! (e.g. a truly ended stream). The delay grows with the count and is
//! capped; the count is reset only by a successful heal.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::BackoffConfig;
use crate::source::SourceId;

/// Per-source backoff state, owned by the monitor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackoffState {
    pub no_heal_point_count: u32,
    pub next_heal_allowed: Option<Instant>,
    pub last_backoff_log: Option<Instant>,
}

/// Result of one `apply_backoff` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffApplied {
    pub count: u32,
    pub delay: Duration,
    pub next_heal_allowed: Instant,
}

#[derive(Debug, Clone)]
pub struct BackoffManager {
    base: Duration,
    max: Duration,
    log_interval: Duration,
}

impl BackoffManager {
    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            base: Duration::from_millis(config.base_ms),
            max: Duration::from_millis(config.max_ms),
            log_interval: Duration::from_millis(config.log_interval_ms),
        }
    }

    /// `min(base * count, max)`
    pub fn delay_for(&self, count: u32) -> Duration {
        self.base.saturating_mul(count).min(self.max)
    }

    pub fn apply_backoff(
        &self,
        source_id: &SourceId,
        state: &mut BackoffState,
        reason: &str,
        now: Instant,
    ) -> BackoffApplied {
        state.no_heal_point_count = state.no_heal_point_count.saturating_add(1);
        let delay = self.delay_for(state.no_heal_point_count);
        let next = now + delay;
        state.next_heal_allowed = Some(next);

        let log_due = state
            .last_backoff_log
            .map_or(true, |last| now.saturating_duration_since(last) >= self.log_interval);
        if log_due {
            info!(
                source = %source_id,
                reason,
                count = state.no_heal_point_count,
                delay_ms = delay.as_millis() as u64,
                "No heal point, backing off"
            );
            state.last_backoff_log = Some(now);
        } else {
            debug!(
                source = %source_id,
                reason,
                count = state.no_heal_point_count,
                delay_ms = delay.as_millis() as u64,
                "Backoff applied"
            );
        }

        BackoffApplied {
            count: state.no_heal_point_count,
            delay,
            next_heal_allowed: next,
        }
    }

    pub fn should_skip(&self, source_id: &SourceId, state: &BackoffState, now: Instant) -> bool {
        match state.next_heal_allowed {
            Some(next) if now < next => {
                debug!(
                    source = %source_id,
                    remaining_ms = (next - now).as_millis() as u64,
                    "Heal skipped (backoff)"
                );
                true
            }
            _ => false,
        }
    }

    /// Clear the counter after a successful heal
    pub fn reset(&self, source_id: &SourceId, state: &mut BackoffState) {
        if state.no_heal_point_count > 0 {
            debug!(source = %source_id, previous = state.no_heal_point_count, "Backoff reset");
        }
        state.no_heal_point_count = 0;
        state.next_heal_allowed = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(base_ms: u64, max_ms: u64) -> BackoffManager {
        BackoffManager::new(&BackoffConfig {
            base_ms,
            max_ms,
            log_interval_ms: 5000,
        })
    }

    #[test]
    fn test_twenty_applications_are_capped() {
        let mgr = manager(2000, 30_000);
        let id = SourceId::from("v1");
        let mut state = BackoffState::default();
        let now = Instant::now();

        for _ in 0..20 {
            mgr.apply_backoff(&id, &mut state, "no_point", now);
        }

        assert_eq!(state.no_heal_point_count, 20);
        // min(20 * 2000, 30000)
        assert_eq!(state.next_heal_allowed, Some(now + Duration::from_millis(30_000)));
    }

    #[test]
    fn test_next_allowed_tracks_each_application() {
        let mgr = manager(1000, 60_000);
        let id = SourceId::from("v1");
        let mut state = BackoffState::default();
        let now = Instant::now();

        for count in 1..=5u64 {
            let applied = mgr.apply_backoff(&id, &mut state, "no_point", now);
            assert_eq!(applied.delay, Duration::from_millis(1000 * count));
            assert_eq!(state.next_heal_allowed, Some(now + Duration::from_millis(1000 * count)));
        }
    }

    #[test]
    fn test_deadline_follows_capped_delay_for_any_config() {
        let id = SourceId::from("v1");
        let now = Instant::now();

        // max above base, so the first delays are not capped
        for (base_ms, max_ms) in [(2000, 30_000), (1000, 5000), (500, 1750), (250, 60_000), (3000, 7000)] {
            let mgr = manager(base_ms, max_ms);
            let mut state = BackoffState::default();

            for count in 1..=25u64 {
                let applied = mgr.apply_backoff(&id, &mut state, "no_point", now);
                let expected = Duration::from_millis((base_ms * count).min(max_ms));

                assert_eq!(applied.delay, expected, "base={} max={} count={}", base_ms, max_ms, count);
                assert_eq!(state.next_heal_allowed, Some(now + expected));
                assert!(mgr.should_skip(&id, &state, now + expected - Duration::from_millis(1)));
                assert!(!mgr.should_skip(&id, &state, now + expected));
            }
            assert_eq!(state.no_heal_point_count, 25);
        }
    }

    #[test]
    fn test_should_skip_until_deadline() {
        let mgr = manager(2000, 30_000);
        let id = SourceId::from("v1");
        let mut state = BackoffState::default();
        let now = Instant::now();

        assert!(!mgr.should_skip(&id, &state, now));

        mgr.apply_backoff(&id, &mut state, "no_point", now);
        assert!(mgr.should_skip(&id, &state, now));
        assert!(mgr.should_skip(&id, &state, now + Duration::from_millis(1999)));
        assert!(!mgr.should_skip(&id, &state, now + Duration::from_millis(2000)));
    }

    #[test]
    fn test_reset_clears_counter() {
        let mgr = manager(2000, 30_000);
        let id = SourceId::from("v1");
        let mut state = BackoffState::default();
        let now = Instant::now();

        mgr.apply_backoff(&id, &mut state, "no_point", now);
        mgr.apply_backoff(&id, &mut state, "no_point", now);
        mgr.reset(&id, &mut state);

        assert_eq!(state.no_heal_point_count, 0);
        assert!(!mgr.should_skip(&id, &state, now));
        assert_eq!(mgr.apply_backoff(&id, &mut state, "no_point", now).count, 1);
    }

    #[test]
    fn test_info_log_throttled() {
        let mgr = manager(2000, 30_000);
        let id = SourceId::from("v1");
        let mut state = BackoffState::default();
        let now = Instant::now();

        mgr.apply_backoff(&id, &mut state, "no_point", now);
        assert_eq!(state.last_backoff_log, Some(now));

        mgr.apply_backoff(&id, &mut state, "no_point", now + Duration::from_millis(100));
        assert_eq!(state.last_backoff_log, Some(now), "Second log inside interval suppressed");

        let later = now + Duration::from_millis(6000);
        mgr.apply_backoff(&id, &mut state, "no_point", later);
        assert_eq!(state.last_backoff_log, Some(later));
    }
}
