//! Event types for the streamheal event system
//!
//! Provides the shared `HealEvent` definitions and the `EventBus` used to
//! publish them. Every recovery attempt, lock acquisition/release, backoff
//! application, trust decision and state transition produces one event.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Per-source monitor state
///
/// Lives here (rather than in the engine) so events can carry it typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonitorState {
    /// Position advancing
    Playing,
    /// No position advance for longer than the confirmation window
    Stalled,
    /// A recovery has been dispatched and is awaiting confirmation
    Healing,
    /// Media error or fatal play failure
    Error,
    /// Detached, ended or unrecoverable. Terminal until replaced.
    Dead,
    /// Mid hard-reset (aggressive recovery)
    ResetPending,
}

impl MonitorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorState::Playing => "PLAYING",
            MonitorState::Stalled => "STALLED",
            MonitorState::Healing => "HEALING",
            MonitorState::Error => "ERROR",
            MonitorState::Dead => "DEAD",
            MonitorState::ResetPending => "RESET_PENDING",
        }
    }
}

impl std::fmt::Display for MonitorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// streamheal event types
///
/// Events are broadcast via EventBus and can be serialized as JSON lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HealEvent {
    /// A playback source started being monitored
    SourceAttached {
        source_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A playback source stopped being monitored
    SourceRemoved {
        source_id: String,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Monitor state transition for one source
    StateChanged {
        source_id: String,
        old_state: MonitorState,
        new_state: MonitorState,
        /// Short tag naming the telemetry/signal that drove the transition
        cause: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Recovery lock granted
    RecoveryLockAcquired {
        attempt_id: Uuid,
        source_id: String,
        /// True when a stale holder was force-cleared
        forced: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Recovery lock released
    RecoveryLockReleased {
        attempt_id: Uuid,
        source_id: String,
        held_ms: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Recovery attempt dispatched
    RecoveryStarted {
        attempt_id: Uuid,
        source_id: String,
        strategy: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Recovery attempt finished (success or failure)
    RecoveryFinished {
        attempt_id: Uuid,
        source_id: String,
        strategy: String,
        success: bool,
        detail: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Backoff applied after a "no heal point" outcome
    BackoffApplied {
        source_id: String,
        reason: String,
        no_heal_point_count: u32,
        delay_ms: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Trust evaluation result for one candidate
    TrustEvaluated {
        source_id: String,
        trusted: bool,
        reason: String,
        score: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Active candidate changed
    CandidateSwitched {
        from_id: Option<String>,
        to_id: String,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A proposed switch was suppressed (probation, dead target)
    SwitchSuppressed {
        from_id: Option<String>,
        to_id: String,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// External signal received (message already truncated)
    SignalReceived {
        kind: String,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl HealEvent {
    /// Short tag for log lines
    pub fn tag(&self) -> &'static str {
        match self {
            HealEvent::SourceAttached { .. } => "source_attached",
            HealEvent::SourceRemoved { .. } => "source_removed",
            HealEvent::StateChanged { .. } => "state_changed",
            HealEvent::RecoveryLockAcquired { .. } => "lock_acquired",
            HealEvent::RecoveryLockReleased { .. } => "lock_released",
            HealEvent::RecoveryStarted { .. } => "recovery_started",
            HealEvent::RecoveryFinished { .. } => "recovery_finished",
            HealEvent::BackoffApplied { .. } => "backoff_applied",
            HealEvent::TrustEvaluated { .. } => "trust_evaluated",
            HealEvent::CandidateSwitched { .. } => "candidate_switched",
            HealEvent::SwitchSuppressed { .. } => "switch_suppressed",
            HealEvent::SignalReceived { .. } => "signal_received",
        }
    }

    /// Serialize as a single JSON line
    pub fn to_json_line(&self) -> String {
        // Serialization of these plain variants cannot fail; fall back to the tag anyway
        serde_json::to_string(self).unwrap_or_else(|_| format!("{{\"type\":\"{}\"}}", self.tag()))
    }
}

/// Central event distribution bus
///
/// Uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use streamheal_common::events::{EventBus, HealEvent};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(HealEvent::SourceAttached {
///     source_id: "v1".to_string(),
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<HealEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<HealEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: HealEvent) -> Result<usize, broadcast::error::SendError<HealEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    ///
    /// Observation must never abort a recovery attempt, so this is what the
    /// engine uses.
    pub fn emit_lossy(&self, event: HealEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_state_serializes_screaming_case() {
        let json = serde_json::to_string(&MonitorState::ResetPending).unwrap();
        assert_eq!(json, "\"RESET_PENDING\"");
        assert_eq!(MonitorState::Healing.to_string(), "HEALING");
    }

    #[test]
    fn test_event_json_line_carries_type_tag() {
        let event = HealEvent::BackoffApplied {
            source_id: "v1".to_string(),
            reason: "no_heal_point".to_string(),
            no_heal_point_count: 3,
            delay_ms: 6000,
            timestamp: chrono::Utc::now(),
        };

        let line = event.to_json_line();
        assert!(line.contains("\"type\":\"BackoffApplied\""));
        assert!(line.contains("\"no_heal_point_count\":3"));
        assert_eq!(event.tag(), "backoff_applied");
    }

    #[test]
    fn test_event_roundtrip_state_changed() {
        let event = HealEvent::StateChanged {
            source_id: "v2".to_string(),
            old_state: MonitorState::Playing,
            new_state: MonitorState::Stalled,
            cause: "stall_confirmed".to_string(),
            timestamp: chrono::Utc::now(),
        };
        let parsed: HealEvent = serde_json::from_str(&event.to_json_line()).unwrap();
        match parsed {
            HealEvent::StateChanged { old_state, new_state, .. } => {
                assert_eq!(old_state, MonitorState::Playing);
                assert_eq!(new_state, MonitorState::Stalled);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_eventbus_emit_without_subscribers() {
        let bus = EventBus::new(4);
        let result = bus.emit(HealEvent::SourceAttached {
            source_id: "v1".to_string(),
            timestamp: chrono::Utc::now(),
        });
        assert!(result.is_err(), "No subscribers should report an error");
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_eventbus_emit_lossy_on_full_channel() {
        let bus = EventBus::new(2);
        let _rx = bus.subscribe();

        for i in 0..10 {
            bus.emit_lossy(HealEvent::SignalReceived {
                kind: "ad_detected".to_string(),
                message: format!("signal {}", i),
                timestamp: chrono::Utc::now(),
            });
        }

        assert_eq!(bus.capacity(), 2);
        assert_eq!(bus.subscriber_count(), 1);
    }
}
