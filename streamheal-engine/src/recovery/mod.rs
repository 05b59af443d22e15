//! Recovery execution: lock, backoff, strategies, heal pipeline, play executor

pub mod backoff;
pub mod heal;
pub mod lock;
pub mod play;
pub mod strategy;

pub use backoff::{BackoffManager, BackoffState};
pub use heal::{HealAttempt, HealPipeline, RetryState, RetryStep};
pub use lock::{LockAcquisition, RecoveryGuard, RecoveryLock};
pub use play::{categorize, ErrorClass, PlayErrorInfo};
pub use strategy::{AvSyncFixer, AvSyncRouter, StrategyKind, StrategyOutcome};
