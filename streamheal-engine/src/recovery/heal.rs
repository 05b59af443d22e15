//! Heal pipeline: seek into a heal point, resume, retry once on abort
//!
//! The retry policy is captured as data (`RetryState`) so it can be tested
//! without driving a source. At most one retry per call; further attempts
//! belong to the next monitoring cycle, gated by backoff.

use std::time::Duration;
use tracing::{debug, info};

use super::play::{self, categorize, ErrorClass};
use crate::buffer::{analyzer, seek_target, HealPoint};
use crate::source::{PlayError, PlaybackSource};

/// Next action after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStep {
    Retry,
    GiveUp,
}

/// Two-step retry state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    /// Attempts made so far
    pub attempt: u8,
    pub last_error: Option<ErrorClass>,
}

impl RetryState {
    /// First attempt plus one retry
    pub const MAX_ATTEMPTS: u8 = 2;

    pub fn record_failure(&mut self, class: ErrorClass) {
        self.attempt = self.attempt.saturating_add(1);
        self.last_error = Some(class);
    }

    /// Only abort-class failures are retried, and only once
    pub fn next_step(&self) -> RetryStep {
        match self.last_error {
            Some(ErrorClass::Abort) if self.attempt < Self::MAX_ATTEMPTS => RetryStep::Retry,
            _ => RetryStep::GiveUp,
        }
    }
}

/// Outcome of `attempt_seek_with_retry`
#[derive(Debug, Clone, PartialEq)]
pub struct HealAttempt {
    pub result: Result<(), PlayError>,
    /// Heal point used by the last attempt
    pub final_point: HealPoint,
    pub attempts: u8,
}

impl HealAttempt {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Clone)]
pub struct HealPipeline {
    retry_delay: Duration,
}

impl HealPipeline {
    pub fn new(retry_delay: Duration) -> Self {
        Self { retry_delay }
    }

    async fn seek_and_play(source: &dyn PlaybackSource, point: &HealPoint) -> Result<(), PlayError> {
        let target = seek_target::calculate_safe_target(point);

        // Buffer may have been evicted between discovery and now
        if let Err(rejection) = seek_target::validate(source, target) {
            return Err(PlayError::aborted(format!("heal target {:.3} rejected: {}", target, rejection)));
        }

        source.seek(target).await?;
        play::attempt_play(source).await
    }

    pub async fn attempt_seek_with_retry(
        &self,
        source: &dyn PlaybackSource,
        target_point: HealPoint,
    ) -> HealAttempt {
        // Rediscovery is relative to where the stall happened, not to the
        // heal target the first attempt may already have seeked into
        let stall_position = source.position();
        let mut retry = RetryState::default();
        let mut point = target_point;

        loop {
            let error = match Self::seek_and_play(source, &point).await {
                Ok(()) => {
                    return HealAttempt {
                        result: Ok(()),
                        final_point: point,
                        attempts: retry.attempt + 1,
                    }
                }
                Err(e) => e,
            };

            retry.record_failure(categorize(&error).class);
            if retry.next_step() == RetryStep::GiveUp {
                debug!(attempts = retry.attempt, error = %error, "Heal attempt failed");
                return HealAttempt {
                    result: Err(error),
                    final_point: point,
                    attempts: retry.attempt,
                };
            }

            tokio::time::sleep(self.retry_delay).await;

            match analyzer::heal_point_at(&source.buffered(), stall_position) {
                Some(next) => point = next,
                None => {
                    info!(error = %error, "Heal retry skipped: no heal point after abort");
                    return HealAttempt {
                        result: Err(error),
                        final_point: point,
                        attempts: retry.attempt,
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferRange;
    use crate::sim::SimulatedSource;

    fn pipeline() -> HealPipeline {
        HealPipeline::new(Duration::from_millis(150))
    }

    #[test]
    fn test_retry_state_retries_abort_once() {
        let mut state = RetryState::default();
        state.record_failure(ErrorClass::Abort);
        assert_eq!(state.next_step(), RetryStep::Retry);

        state.record_failure(ErrorClass::Abort);
        assert_eq!(state.next_step(), RetryStep::GiveUp);
    }

    #[test]
    fn test_retry_state_never_retries_fatal_or_other() {
        let mut fatal = RetryState::default();
        fatal.record_failure(ErrorClass::Fatal);
        assert_eq!(fatal.next_step(), RetryStep::GiveUp);

        let mut other = RetryState::default();
        other.record_failure(ErrorClass::Other);
        assert_eq!(other.next_step(), RetryStep::GiveUp);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let source = SimulatedSource::new(
            vec![BufferRange::new(0.0, 10.0), BufferRange::new(12.0, 20.0)],
            9.9,
        );
        let attempt = pipeline()
            .attempt_seek_with_retry(&source, HealPoint::new(12.0, 20.0))
            .await;

        assert!(attempt.succeeded());
        assert_eq!(attempt.attempts, 1);
        assert!((source.position() - 12.5).abs() < 1e-9);
        assert!(!source.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_then_retry_succeeds() {
        let source = SimulatedSource::new(
            vec![BufferRange::new(0.0, 10.0), BufferRange::new(12.0, 20.0)],
            9.9,
        );
        source.queue_play_failures([PlayError::aborted("interrupted by seek")]);

        let attempt = pipeline()
            .attempt_seek_with_retry(&source, HealPoint::new(12.0, 20.0))
            .await;

        assert!(attempt.succeeded());
        assert_eq!(attempt.attempts, 2);
        assert_eq!(attempt.final_point, HealPoint::new(12.0, 20.0));
        assert_eq!(source.play_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_at_most_one_retry() {
        let source = SimulatedSource::new(
            vec![BufferRange::new(0.0, 10.0), BufferRange::new(12.0, 20.0)],
            9.9,
        );
        source.queue_play_failures([
            PlayError::aborted("first"),
            PlayError::aborted("second"),
            PlayError::aborted("third"),
        ]);

        let attempt = pipeline()
            .attempt_seek_with_retry(&source, HealPoint::new(12.0, 20.0))
            .await;

        assert!(!attempt.succeeded());
        assert_eq!(attempt.attempts, 2);
        assert_eq!(source.play_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_is_not_retried() {
        let source = SimulatedSource::new(
            vec![BufferRange::new(0.0, 10.0), BufferRange::new(12.0, 20.0)],
            9.9,
        );
        source.queue_play_failures([PlayError::not_allowed("autoplay")]);

        let attempt = pipeline()
            .attempt_seek_with_retry(&source, HealPoint::new(12.0, 20.0))
            .await;

        assert_eq!(attempt.result, Err(PlayError::not_allowed("autoplay")));
        assert_eq!(attempt.attempts, 1);
        assert_eq!(source.play_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_vanished_heal_point_skips_retry_with_original_error() {
        // Heal point is not buffered at all: validation rejects, rediscovery finds nothing
        let source = SimulatedSource::new(vec![BufferRange::new(0.0, 10.0)], 9.9);

        let attempt = pipeline()
            .attempt_seek_with_retry(&source, HealPoint::new(12.0, 20.0))
            .await;

        let err = attempt.result.unwrap_err();
        assert_eq!(err.name, "AbortError");
        assert_eq!(attempt.attempts, 1);
        assert_eq!(source.seek_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_uses_rediscovered_point() {
        let source = SimulatedSource::new(
            vec![BufferRange::new(0.0, 10.0), BufferRange::new(14.0, 22.0)],
            9.9,
        );

        // Stale point from an earlier discovery; rediscovery finds [14, 22)
        let attempt = pipeline()
            .attempt_seek_with_retry(&source, HealPoint::new(11.0, 11.8))
            .await;

        assert!(attempt.succeeded());
        assert_eq!(attempt.final_point, HealPoint::new(14.0, 22.0));
        assert!((source.position() - 14.5).abs() < 1e-9);
    }
}
