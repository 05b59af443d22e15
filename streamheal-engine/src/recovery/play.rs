//! Play executor
//!
//! Resumes playback and classifies failures. Permission and capability
//! denials are fatal (retrying cannot help); everything else, including
//! aborts caused by a racing seek, is retryable.

use tracing::{debug, warn};

use crate::source::{PlayError, PlaybackSource};

/// Coarse class used by the retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Interrupted by a concurrent operation
    Abort,
    /// NotAllowed / NotSupported
    Fatal,
    Other,
}

/// Categorized play failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayErrorInfo {
    pub name: String,
    pub message: String,
    pub is_fatal: bool,
    pub class: ErrorClass,
}

pub fn categorize(error: &PlayError) -> PlayErrorInfo {
    let is_fatal = error.name.contains("NotAllowed") || error.name.contains("NotSupported");
    let class = if is_fatal {
        ErrorClass::Fatal
    } else if is_abort(error) {
        ErrorClass::Abort
    } else {
        ErrorClass::Other
    };

    PlayErrorInfo {
        name: error.name.clone(),
        message: error.message.clone(),
        is_fatal,
        class,
    }
}

fn is_abort(error: &PlayError) -> bool {
    let message = error.message.to_ascii_lowercase();
    error.name.contains("Abort") || message.contains("aborted") || message.contains("interrupted")
}

pub async fn attempt_play(source: &dyn PlaybackSource) -> Result<(), PlayError> {
    match source.play().await {
        Ok(()) => {
            debug!("Play resolved");
            Ok(())
        }
        Err(e) => {
            let info = categorize(&e);
            if info.is_fatal {
                warn!(name = %info.name, message = %info.message, "Play failed (fatal)");
            } else {
                debug!(name = %info.name, message = %info.message, "Play failed (retryable)");
            }
            Err(e)
        }
    }
}
