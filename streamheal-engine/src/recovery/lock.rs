//! Recovery lock
//!
//! Process-wide guard ensuring at most one recovery executes at a time.
//! A recovery step can hang on an external async operation (a `play` that
//! never settles), so a lock held past the stale timeout is force-reset by
//! the next acquirer rather than wedging healing forever.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Outcome of an acquisition attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAcquisition {
    Granted,
    /// Previous holder exceeded the stale timeout and was cleared
    ForceReset { stale_ms: u64 },
    /// Held by a live recovery
    Busy,
}

impl LockAcquisition {
    pub fn is_granted(&self) -> bool {
        !matches!(self, LockAcquisition::Busy)
    }
}

#[derive(Debug, Default)]
struct LockState {
    acquired_at: Option<Instant>,
    /// Bumped on every grant so a stale guard cannot release a newer holder
    generation: u64,
}

/// Shared recovery lock handle (clone to share)
#[derive(Debug, Clone)]
pub struct RecoveryLock {
    state: Arc<Mutex<LockState>>,
    stale_timeout: Duration,
}

impl RecoveryLock {
    pub fn new(stale_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(LockState::default())),
            stale_timeout,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, LockState> {
        // Poisoning only means a panic elsewhere; the state is still a plain value
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Try to take the lock at `now`
    pub fn try_acquire(&self, now: Instant) -> LockAcquisition {
        self.try_acquire_generation(now).0
    }

    fn try_acquire_generation(&self, now: Instant) -> (LockAcquisition, u64) {
        let mut state = self.lock_state();

        let outcome = match state.acquired_at {
            None => LockAcquisition::Granted,
            Some(acquired_at) => {
                let held_for = now.saturating_duration_since(acquired_at);
                if held_for < self.stale_timeout {
                    return (LockAcquisition::Busy, state.generation);
                }
                let stale_ms = held_for.as_millis() as u64;
                warn!(stale_ms, "Recovery lock stale, force-resetting");
                LockAcquisition::ForceReset { stale_ms }
            }
        };

        state.acquired_at = Some(now);
        state.generation = state.generation.wrapping_add(1);
        debug!(generation = state.generation, "Recovery lock acquired");
        (outcome, state.generation)
    }

    /// Boolean form of `try_acquire`
    pub fn acquire(&self, now: Instant) -> bool {
        self.try_acquire(now).is_granted()
    }

    /// Release the lock (idempotent)
    pub fn release(&self) {
        let mut state = self.lock_state();
        if state.acquired_at.take().is_some() {
            debug!(generation = state.generation, "Recovery lock released");
        }
    }

    pub fn is_locked(&self) -> bool {
        self.lock_state().acquired_at.is_some()
    }

    /// Acquire and return a guard that releases on drop
    ///
    /// Every exit path of a recovery (including errors from the source)
    /// releases the lock once the guard goes out of scope.
    pub fn try_guard(&self, now: Instant) -> Option<RecoveryGuard> {
        let (outcome, generation) = self.try_acquire_generation(now);
        if !outcome.is_granted() {
            return None;
        }
        Some(RecoveryGuard {
            lock: self.clone(),
            generation,
            acquired_at: now,
            forced: matches!(outcome, LockAcquisition::ForceReset { .. }),
        })
    }

    fn release_generation(&self, generation: u64) {
        let mut state = self.lock_state();
        if state.generation == generation && state.acquired_at.take().is_some() {
            debug!(generation, "Recovery lock released");
        }
    }
}

/// RAII holder of the recovery lock
#[derive(Debug)]
pub struct RecoveryGuard {
    lock: RecoveryLock,
    generation: u64,
    acquired_at: Instant,
    forced: bool,
}

impl RecoveryGuard {
    /// True when this grant cleared a stale holder
    pub fn forced(&self) -> bool {
        self.forced
    }

    pub fn acquired_at(&self) -> Instant {
        self.acquired_at
    }
}

impl Drop for RecoveryGuard {
    fn drop(&mut self) {
        self.lock.release_generation(self.generation);
    }
}
