//! Shared engine state
//!
//! Event bus and metrics counters, constructed once per process by the
//! orchestrating context and passed to components explicitly.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use streamheal_common::events::{EventBus, HealEvent};
use tokio::sync::broadcast;

/// Recovery metrics counters
///
/// Lock-free; read by reporters while the monitor increments them.
#[derive(Debug, Default)]
pub struct HealMetrics {
    ad_detections: AtomicU64,
    recoveries_succeeded: AtomicU64,
    aggressive_recoveries: AtomicU64,
    heal_attempts: AtomicU64,
}

/// Point-in-time copy of `HealMetrics`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub ad_detections: u64,
    pub recoveries_succeeded: u64,
    pub aggressive_recoveries: u64,
    pub heal_attempts: u64,
}

impl HealMetrics {
    pub fn record_ad_detection(&self) {
        self.ad_detections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_recovery_success(&self) {
        self.recoveries_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_aggressive_recovery(&self) {
        self.aggressive_recoveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_heal_attempt(&self) {
        self.heal_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ad_detections: self.ad_detections.load(Ordering::Relaxed),
            recoveries_succeeded: self.recoveries_succeeded.load(Ordering::Relaxed),
            aggressive_recoveries: self.aggressive_recoveries.load(Ordering::Relaxed),
            heal_attempts: self.heal_attempts.load(Ordering::Relaxed),
        }
    }
}

/// Shared state accessible by all components
pub struct SharedState {
    /// Event broadcaster for observers
    events: EventBus,

    pub metrics: HealMetrics,
}

impl SharedState {
    /// Create new shared state with an event buffer of `event_capacity`
    pub fn new(event_capacity: usize) -> Self {
        Self {
            events: EventBus::new(event_capacity),
            metrics: HealMetrics::default(),
        }
    }

    /// Broadcast an event to all listeners
    pub fn broadcast_event(&self, event: HealEvent) {
        // No receivers is OK
        self.events.emit_lossy(event);
    }

    /// Subscribe to the event stream
    pub fn subscribe_events(&self) -> broadcast::Receiver<HealEvent> {
        self.events.subscribe()
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new(256)
    }
}
