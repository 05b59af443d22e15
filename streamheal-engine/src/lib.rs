//! # streamheal engine
//!
//! Stall detection and self-healing recovery for live media playback
//! sources.
//!
//! **Purpose:** Watch one or more playback sources, detect stalls and dead
//! sources from raw telemetry, and recover by seeking into fresh buffered
//! content, hard-resetting the pipeline, or failing over to a healthier
//! source.
//!
//! **Architecture:** A single `PlaybackMonitor` owns per-source state and
//! drives the buffer analyzer, strategy selection, heal pipeline and
//! candidate selector. A process-wide `RecoveryLock` serializes recovery.

pub mod buffer;
pub mod candidate;
pub mod config;
pub mod error;
pub mod monitor;
pub mod recovery;
pub mod scenario;
pub mod sim;
pub mod source;
pub mod state;

pub use config::HealerConfig;
pub use error::{Error, Result};
pub use monitor::{PlaybackMonitor, Signal, SignalKind, Telemetry};
pub use source::{PlayError, PlaybackSource, SourceHandle, SourceId};
pub use state::SharedState;
