//! Scenario replay
//!
//! A scenario scripts one or more simulated sources and timed events
//! (buffer arrivals, detaches, errors, signals) and drives a
//! `PlaybackMonitor` through them tick by tick on a virtual clock.
//!
//! ```toml
//! duration_ms = 20000
//! tick_ms = 250
//! failover = true
//!
//! [[sources]]
//! id = "v1"
//! ranges = [[0.0, 10.0]]
//! active = true
//!
//! [[events]]
//! at_ms = 12000
//! source = "v1"
//! action = "append_range"
//! range = [14.0, 60.0]
//! ```

use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::buffer::BufferRange;
use crate::error::{Error, Result};
use crate::monitor::{MonitorState, PlaybackMonitor, RecoveryOutcome, Signal, Telemetry};
use crate::sim::SimulatedSource;
use crate::source::{PlayError, SourceId};
use crate::state::MetricsSnapshot;

/// Built-in scenario used when no file is given. `v1` starves at the end
/// of its buffer during an ad, heals once fresh content lands past the gap,
/// then is detached and playback fails over to `v2`.
pub const DEMO_SCENARIO: &str = r#"
name = "ad-gap"
duration_ms = 18000
tick_ms = 250
failover = true

[[sources]]
id = "v1"
ranges = [[0.0, 6.0]]
active = true

[[sources]]
id = "v2"
ranges = [[0.0, 120.0]]
paused = true

[[events]]
at_ms = 4000
source = "v1"
action = "signal"
signal = { type = "ad_detected", message = "ad segment substituted", url = "https://cdn.example/ad.ts" }

[[events]]
at_ms = 9000
source = "v1"
action = "append_range"
range = [7.0, 60.0]

[[events]]
at_ms = 12000
source = "v2"
action = "resume"

[[events]]
at_ms = 15000
source = "v1"
action = "detach"
"#;

fn default_duration_ms() -> u64 {
    30_000
}

fn default_tick_ms() -> u64 {
    250
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_duration_ms")]
    pub duration_ms: u64,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Overrides the monitor's failover setting for this run
    #[serde(default)]
    pub failover: Option<bool>,
    #[serde(default)]
    pub sources: Vec<ScenarioSource>,
    #[serde(default)]
    pub events: Vec<ScenarioEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioSource {
    pub id: String,
    #[serde(default)]
    pub ranges: Vec<[f64; 2]>,
    #[serde(default)]
    pub position: f64,
    #[serde(default)]
    pub paused: bool,
    /// Error names returned by the first `play` calls
    #[serde(default)]
    pub play_failures: Vec<String>,
    /// Ranges reported after a hard reset
    #[serde(default)]
    pub reload_ranges: Option<Vec<[f64; 2]>>,
    #[serde(default)]
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioEvent {
    pub at_ms: u64,
    /// Target source; signals fall back to the active source
    #[serde(default)]
    pub source: Option<String>,
    #[serde(flatten)]
    pub action: ScenarioAction,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScenarioAction {
    AppendRange {
        range: [f64; 2],
    },
    SetRanges {
        ranges: Vec<[f64; 2]>,
    },
    FailPlay {
        #[serde(default = "default_failure_name")]
        name: String,
        #[serde(default)]
        message: String,
    },
    Pause,
    Resume,
    Detach,
    End,
    Error,
    Signal {
        signal: Signal,
    },
}

fn default_failure_name() -> String {
    "AbortError".to_string()
}

fn to_ranges(pairs: &[[f64; 2]]) -> Vec<BufferRange> {
    pairs.iter().map(|[start, end]| BufferRange::new(*start, *end)).collect()
}

impl Scenario {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let scenario: Scenario =
            toml::from_str(content).map_err(|e| Error::Scenario(e.to_string()))?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn demo() -> Result<Self> {
        Self::from_toml_str(DEMO_SCENARIO)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_ms == 0 {
            return Err(Error::Scenario("tick_ms must be > 0".to_string()));
        }
        if self.sources.is_empty() {
            return Err(Error::Scenario("at least one source is required".to_string()));
        }

        let mut ids = HashSet::new();
        for source in &self.sources {
            if !ids.insert(source.id.as_str()) {
                return Err(Error::Scenario(format!("duplicate source id '{}'", source.id)));
            }
            let all_ranges = source.ranges.iter().chain(source.reload_ranges.iter().flatten());
            if let Some([start, end]) = all_ranges.into_iter().find(|[s, e]| s > e) {
                return Err(Error::Scenario(format!(
                    "source '{}': range start {} is after end {}",
                    source.id, start, end
                )));
            }
        }

        for event in &self.events {
            if let Some(id) = &event.source {
                if !ids.contains(id.as_str()) {
                    return Err(Error::Scenario(format!(
                        "event at {} ms targets unknown source '{}'",
                        event.at_ms, id
                    )));
                }
            }
            let needs_source = !matches!(event.action, ScenarioAction::Signal { .. });
            if needs_source && event.source.is_none() {
                return Err(Error::Scenario(format!(
                    "event at {} ms needs a source",
                    event.at_ms
                )));
            }
        }
        Ok(())
    }
}

/// Summary of a finished replay
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub ticks: u64,
    pub recoveries: u32,
    pub final_active: Option<SourceId>,
    pub final_states: BTreeMap<SourceId, MonitorState>,
    pub metrics: MetricsSnapshot,
}

/// Replays a scenario against a monitor
pub struct ScenarioRunner {
    scenario: Scenario,
    sources: BTreeMap<SourceId, Arc<SimulatedSource>>,
}

impl ScenarioRunner {
    pub fn new(scenario: Scenario) -> Self {
        let sources = scenario
            .sources
            .iter()
            .map(|spec| {
                let sim = SimulatedSource::new(to_ranges(&spec.ranges), spec.position);
                sim.set_paused(spec.paused);
                sim.queue_play_failures(
                    spec.play_failures
                        .iter()
                        .map(|name| PlayError::new(name.clone(), "scripted failure")),
                );
                if let Some(reload) = &spec.reload_ranges {
                    sim.set_reload_ranges(to_ranges(reload));
                }
                (SourceId::from(spec.id.as_str()), Arc::new(sim))
            })
            .collect();

        Self { scenario, sources }
    }

    pub fn source(&self, id: &SourceId) -> Option<&Arc<SimulatedSource>> {
        self.sources.get(id)
    }

    /// Run to completion. Time is virtual: tick `n` happens at
    /// `start + n * tick_ms` without sleeping in between.
    pub async fn run(&self, monitor: &mut PlaybackMonitor) -> Result<ScenarioReport> {
        let start = Instant::now();
        info!(
            name = %self.scenario.name,
            duration_ms = self.scenario.duration_ms,
            sources = self.sources.len(),
            "Scenario started"
        );

        if let Some(enabled) = self.scenario.failover {
            monitor.set_failover(enabled);
        }

        // Active sources first so the selector adopts them
        let mut specs: Vec<&ScenarioSource> = self.scenario.sources.iter().collect();
        specs.sort_by_key(|spec| !spec.active);
        for spec in specs {
            let id = SourceId::from(spec.id.as_str());
            if let Some(sim) = self.sources.get(&id) {
                monitor.attach(id, sim.clone(), start)?;
            }
        }

        let mut events: Vec<&ScenarioEvent> = self.scenario.events.iter().collect();
        events.sort_by_key(|e| e.at_ms);
        let mut pending = events.into_iter().peekable();

        let tick_secs = self.scenario.tick_ms as f64 / 1000.0;
        let ticks = self.scenario.duration_ms / self.scenario.tick_ms;
        let mut recoveries = 0u32;

        for tick in 0..=ticks {
            let t_ms = tick * self.scenario.tick_ms;
            let now = start + Duration::from_millis(t_ms);

            if tick > 0 {
                for sim in self.sources.values() {
                    sim.advance(tick_secs);
                }
            }

            while let Some(event) = pending.next_if(|e| e.at_ms <= t_ms) {
                self.apply(event, monitor, now).await?;
            }

            let report = monitor.evaluate(now).await?;
            if matches!(report.recovery, Some(RecoveryOutcome::Completed { .. })) {
                recoveries += 1;
            }
        }

        let final_states = self
            .sources
            .keys()
            .filter_map(|id| monitor.state_of(id).map(|state| (id.clone(), state)))
            .collect();

        let report = ScenarioReport {
            ticks: ticks + 1,
            recoveries,
            final_active: monitor.active().cloned(),
            final_states,
            metrics: monitor.shared().metrics.snapshot(),
        };
        info!(ticks = report.ticks, recoveries, "Scenario finished");
        Ok(report)
    }

    async fn apply(
        &self,
        event: &ScenarioEvent,
        monitor: &mut PlaybackMonitor,
        now: Instant,
    ) -> Result<()> {
        let id = event.source.as_deref().map(SourceId::from);
        let sim = id.as_ref().and_then(|id| self.sources.get(id));
        debug!(at_ms = event.at_ms, source = ?event.source, action = ?event.action, "Scenario event");

        match (&event.action, id.as_ref(), sim) {
            (ScenarioAction::Signal { signal }, target, _) => {
                monitor.handle_signal(signal, target, now).await?;
            }
            (action, Some(id), Some(sim)) => match action {
                ScenarioAction::AppendRange { range: [start, end] } => {
                    sim.append_range(BufferRange::new(*start, *end));
                    monitor.handle_telemetry(id, Telemetry::Progress, now)?;
                }
                ScenarioAction::SetRanges { ranges } => {
                    sim.set_ranges(to_ranges(ranges));
                    monitor.handle_telemetry(id, Telemetry::Progress, now)?;
                }
                ScenarioAction::FailPlay { name, message } => {
                    sim.queue_play_failures([PlayError::new(name.clone(), message.clone())]);
                }
                ScenarioAction::Pause => sim.set_paused(true),
                ScenarioAction::Resume => sim.set_paused(false),
                ScenarioAction::Detach => {
                    sim.detach();
                    monitor.handle_telemetry(id, Telemetry::Detached, now)?;
                }
                ScenarioAction::End => {
                    sim.end();
                    monitor.handle_telemetry(id, Telemetry::Ended, now)?;
                }
                ScenarioAction::Error => {
                    sim.set_media_error(true);
                    monitor.handle_telemetry(id, Telemetry::Error, now)?;
                }
                ScenarioAction::Signal { .. } => {}
            },
            (_, id, _) => {
                return Err(Error::Scenario(format!(
                    "event at {} ms: unknown source {:?}",
                    event.at_ms, id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::SignalKind;

    #[test]
    fn test_demo_scenario_parses() {
        let scenario = Scenario::demo().unwrap();
        assert_eq!(scenario.sources.len(), 2);
        assert!(scenario.sources[0].active);
        assert!(scenario.sources[1].paused);
        assert_eq!(scenario.events.len(), 4);
        assert_eq!(scenario.failover, Some(true));
        match &scenario.events[0].action {
            ScenarioAction::Signal { signal } => assert_eq!(signal.kind, SignalKind::AdDetected),
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_event_actions_parse() {
        let scenario = Scenario::from_toml_str(
            r#"
            [[sources]]
            id = "v1"
            ranges = [[0.0, 5.0]]

            [[events]]
            at_ms = 100
            source = "v1"
            action = "fail_play"
            name = "NotAllowedError"

            [[events]]
            at_ms = 200
            source = "v1"
            action = "detach"
            "#,
        )
        .unwrap();

        assert_eq!(scenario.tick_ms, 250);
        assert_eq!(scenario.failover, None);
        assert!(matches!(
            &scenario.events[0].action,
            ScenarioAction::FailPlay { name, .. } if name == "NotAllowedError"
        ));
        assert!(matches!(scenario.events[1].action, ScenarioAction::Detach));
    }

    #[test]
    fn test_rejects_unknown_event_source() {
        let result = Scenario::from_toml_str(
            r#"
            [[sources]]
            id = "v1"

            [[events]]
            at_ms = 0
            source = "v9"
            action = "end"
            "#,
        );
        assert!(matches!(result, Err(Error::Scenario(_))));
    }

    #[test]
    fn test_rejects_inverted_range() {
        let result = Scenario::from_toml_str(
            r#"
            [[sources]]
            id = "v1"
            ranges = [[5.0, 1.0]]
            "#,
        );
        assert!(matches!(result, Err(Error::Scenario(_))));
    }

    #[test]
    fn test_rejects_empty_scenario() {
        assert!(matches!(
            Scenario::from_toml_str("duration_ms = 1000"),
            Err(Error::Scenario(_))
        ));
    }
}
