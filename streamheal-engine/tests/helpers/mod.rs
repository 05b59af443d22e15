//! Test helpers for streamheal-engine integration tests
//!
//! Provides:
//! - monitor construction with default, failover or custom config
//! - simulated sources
//! - a tick driver that advances sources and evaluates on a virtual clock
//! - event collection from the bus
//! - log capture (`log_capture`)

#![allow(dead_code)]

pub mod log_capture;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::time::Instant;

use streamheal_common::events::HealEvent;
use streamheal_engine::buffer::BufferRange;
use streamheal_engine::monitor::{EvaluationReport, PlaybackMonitor};
use streamheal_engine::sim::SimulatedSource;
use streamheal_engine::{HealerConfig, SharedState, SourceId};

pub const TICK_MS: u64 = 250;

/// Large enough that a whole test run never lags a receiver
const EVENT_CAPACITY: usize = 4096;

pub fn test_monitor() -> PlaybackMonitor {
    monitor_with(HealerConfig::default())
}

/// Default config with trusted failover switched on
pub fn failover_monitor() -> PlaybackMonitor {
    let mut config = HealerConfig::default();
    config.candidate.failover = true;
    monitor_with(config)
}

pub fn monitor_with(config: HealerConfig) -> PlaybackMonitor {
    PlaybackMonitor::new(config, Arc::new(SharedState::new(EVENT_CAPACITY))).expect("valid config")
}

pub fn sim_source(ranges: &[(f64, f64)], position: f64) -> Arc<SimulatedSource> {
    let ranges = ranges
        .iter()
        .map(|(start, end)| BufferRange::new(*start, *end))
        .collect();
    Arc::new(SimulatedSource::new(ranges, position))
}

pub fn id(name: &str) -> SourceId {
    SourceId::from(name)
}

/// Drives a monitor tick by tick on a virtual clock
pub struct Driver {
    pub start: Instant,
    pub tick: u64,
    sources: Vec<Arc<SimulatedSource>>,
}

impl Driver {
    pub fn new(start: Instant, sources: &[&Arc<SimulatedSource>]) -> Self {
        Self {
            start,
            tick: 0,
            sources: sources.iter().map(|s| Arc::clone(s)).collect(),
        }
    }

    pub fn now(&self) -> Instant {
        self.start + Duration::from_millis(self.tick * TICK_MS)
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.tick * TICK_MS
    }

    /// Evaluate at the current tick, then move to the next one
    pub async fn step(&mut self, monitor: &mut PlaybackMonitor) -> EvaluationReport {
        if self.tick > 0 {
            for source in &self.sources {
                source.advance(TICK_MS as f64 / 1000.0);
            }
        }
        let report = monitor.evaluate(self.now()).await.expect("evaluate");
        self.tick += 1;
        report
    }

    /// Step until the virtual clock has passed `ms`; returns every report
    pub async fn run_until(&mut self, monitor: &mut PlaybackMonitor, ms: u64) -> Vec<EvaluationReport> {
        let mut reports = Vec::new();
        while self.elapsed_ms() <= ms {
            reports.push(self.step(monitor).await);
        }
        reports
    }
}

/// Everything currently queued on the receiver
pub fn drain(rx: &mut broadcast::Receiver<HealEvent>) -> Vec<HealEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    events
}
