//! Recovery strategies
//!
//! Strategy selection is a plain enum dispatched by `match`:
//! - Standard: live-edge catch-up seek for ordinary stalls
//! - Aggressive: hard reset of the media pipeline for severe gaps
//! - AvSync: routed only from an explicit desync signal, never from buffer analysis

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::buffer::analyzer;
use crate::buffer::SeekRejection;
use crate::monitor::signals::SignalKind;
use crate::source::{PlayError, PlaybackSource};

/// Seconds behind the last buffered end that Standard Recovery lands on
pub const LIVE_EDGE_OFFSET_SECS: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    Standard,
    Aggressive,
    AvSync,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Standard => "standard",
            StrategyKind::Aggressive => "aggressive",
            StrategyKind::AvSync => "av_sync",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a strategy did to the source
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyOutcome {
    Seeked { target: f64 },
    /// Pipeline reloaded; `target` is the seek applied afterwards, if any
    Reset { target: Option<f64> },
    /// Nothing to do (e.g. no buffered data)
    Aborted { reason: SeekRejection },
    Failed(PlayError),
}

/// Pick a strategy from the current buffer state
///
/// Re-run on every attempt; buffer conditions change between attempts.
pub fn select(source: &dyn PlaybackSource) -> StrategyKind {
    let analysis = analyzer::analyze(source);
    let kind = if analysis.needs_aggressive {
        StrategyKind::Aggressive
    } else {
        StrategyKind::Standard
    };
    debug!(
        health = analysis.buffer_health.as_str(),
        gap_ms = ?analysis.gap_ms,
        buffer_size = analysis.buffer_size,
        strategy = kind.as_str(),
        "Strategy selected"
    );
    kind
}

/// Live edge: `last.end - 0.5`, never before the last range's start
fn live_edge_target(source: &dyn PlaybackSource) -> Option<f64> {
    source
        .buffered()
        .last()
        .map(|last| (last.end - LIVE_EDGE_OFFSET_SECS).max(last.start))
}

/// Standard recovery: seek to the live edge
///
/// Does not call play; resuming is the play executor's job.
pub async fn execute_standard(source: &dyn PlaybackSource) -> StrategyOutcome {
    let Some(target) = live_edge_target(source) else {
        info!("Standard recovery aborted: no buffered ranges");
        return StrategyOutcome::Aborted {
            reason: SeekRejection::NoBuffer,
        };
    };

    match source.seek(target).await {
        Ok(()) => {
            debug!(target, "Standard recovery seeked to live edge");
            StrategyOutcome::Seeked { target }
        }
        Err(e) => {
            debug!(error = %e, "Standard recovery seek failed");
            StrategyOutcome::Failed(e)
        }
    }
}

/// Aggressive recovery: pause, reload, then seek to the live edge if data returned
pub async fn execute_aggressive(source: &dyn PlaybackSource) -> StrategyOutcome {
    let resume_at = source.position();
    source.pause();

    if let Err(e) = source.reload().await {
        warn!(error = %e, "Hard reset failed");
        return StrategyOutcome::Failed(e);
    }

    let target = live_edge_target(source);
    if let Some(target) = target {
        if let Err(e) = source.seek(target).await {
            warn!(error = %e, "Seek after hard reset failed");
            return StrategyOutcome::Failed(e);
        }
    }

    info!(resume_at, target = ?target, "Hard reset completed");
    StrategyOutcome::Reset { target }
}

/// Specialized A/V desync fix, provided by the embedding application
#[async_trait]
pub trait AvSyncFixer: Send + Sync {
    async fn fix(&self, source: &dyn PlaybackSource) -> bool;
}

/// Re-seek to the current position, which forces decoders to re-align, then resume
#[derive(Debug, Default)]
pub struct ReseekAvSyncFixer;

#[async_trait]
impl AvSyncFixer for ReseekAvSyncFixer {
    async fn fix(&self, source: &dyn PlaybackSource) -> bool {
        let position = source.position();
        if let Err(e) = source.seek(position).await {
            debug!(error = %e, "A/V sync re-seek failed");
            return false;
        }
        source.play().await.is_ok()
    }
}

/// Routes desync signals to the A/V sync fixer
#[derive(Clone)]
pub struct AvSyncRouter {
    fixer: Arc<dyn AvSyncFixer>,
}

impl AvSyncRouter {
    pub fn new(fixer: Arc<dyn AvSyncFixer>) -> Self {
        Self { fixer }
    }

    pub fn should_route(&self, kind: &SignalKind) -> bool {
        matches!(kind, SignalKind::AvSyncIssue)
    }

    pub async fn execute_recovery(&self, source: &dyn PlaybackSource) -> bool {
        let fixed = self.fixer.fix(source).await;
        info!(fixed, "A/V sync recovery finished");
        fixed
    }
}

impl Default for AvSyncRouter {
    fn default() -> Self {
        Self::new(Arc::new(ReseekAvSyncFixer))
    }
}
