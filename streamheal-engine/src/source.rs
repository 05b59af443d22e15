//! Playback source abstraction
//!
//! The engine never owns a source's lifecycle. It holds an
//! `Arc<dyn PlaybackSource>` plus a stable `SourceId` and reacts to what the
//! source reports. All methods take `&self`; implementations use interior
//! mutability.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::buffer::BufferRange;

/// Stable identifier of a monitored source
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SourceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// How much media data the source has for the current position
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadyState {
    HaveNothing,
    HaveMetadata,
    HaveCurrentData,
    HaveFutureData,
    HaveEnoughData,
}

/// Network activity of the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkState {
    Empty,
    Idle,
    Loading,
    NoSource,
}

/// Failure reported by `play`, `seek` or `reload`
///
/// `name` carries the error class reported by the source (for example
/// `AbortError`, `NotAllowedError`); `message` is free text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{name}: {message}")]
pub struct PlayError {
    pub name: String,
    pub message: String,
}

impl PlayError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Play request interrupted by a concurrent seek/load
    pub fn aborted(message: impl Into<String>) -> Self {
        Self::new("AbortError", message)
    }

    /// Playback refused (autoplay policy, permissions)
    pub fn not_allowed(message: impl Into<String>) -> Self {
        Self::new("NotAllowedError", message)
    }

    /// Media cannot be played by this source
    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::new("NotSupportedError", message)
    }
}

/// A playback source the engine monitors and heals
#[async_trait]
pub trait PlaybackSource: Send + Sync {
    /// Current playback position in seconds
    fn position(&self) -> f64;

    fn is_paused(&self) -> bool;

    fn is_ended(&self) -> bool {
        false
    }

    /// False once the source has been detached from its host page
    fn is_attached(&self) -> bool {
        true
    }

    /// True when the source fell back to a placeholder media URL
    fn uses_fallback_src(&self) -> bool {
        false
    }

    /// True while the source reports a media error
    fn has_media_error(&self) -> bool {
        false
    }

    fn ready_state(&self) -> ReadyState;

    fn network_state(&self) -> NetworkState;

    /// Buffered ranges, sorted and disjoint
    fn buffered(&self) -> Vec<BufferRange>;

    /// Resume playback; may fail asynchronously
    async fn play(&self) -> Result<(), PlayError>;

    /// Move the playhead; resolves once the seek has been applied
    async fn seek(&self, time: f64) -> Result<(), PlayError>;

    fn pause(&self);

    /// Tear down and re-open the media pipeline (hard reset)
    async fn reload(&self) -> Result<(), PlayError>;
}

/// Shared handle to a source
pub type SourceHandle = Arc<dyn PlaybackSource>;
