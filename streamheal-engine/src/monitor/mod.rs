//! Playback monitor: per-source state machine, signal routing, orchestration

pub mod engine;
pub mod signals;
pub mod state;

pub use engine::{
    run_periodic, EvaluationReport, PlaybackMonitor, RecoveryOutcome, SkipReason, Telemetry,
};
pub use signals::{Signal, SignalAction, SignalKind, SignalRouter};
pub use state::{MonitorEvent, MonitorFact, MonitorState, SourceTrack, Transition};
