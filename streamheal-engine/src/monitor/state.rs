//! Per-source monitor state machine
//!
//! `SourceTrack::apply` is pure: given the current track, one event and
//! `now`, it returns the next track and the facts the transition produced.
//! The engine owns the tracks and turns facts into log records and events.
//!
//! ```text
//!  Playing ──no advance for window──▶ Stalled ──HealDispatched──▶ Healing
//!     ▲                                  ▲                          │
//!     └──────────── advance ─────────────┴──── failure / timeout ───┘
//!
//!  Stalled ──ResetStarted──▶ ResetPending ──ResetCompleted──▶ Healing
//!  any ──Detached/Ended/failures without progress──▶ Dead (terminal)
//! ```

use tokio::time::Instant;

use super::signals::SignalKind;
use crate::config::StallConfig;
use streamheal_common::time::elapsed_ms;

pub use streamheal_common::events::MonitorState;

/// Position changes smaller than this are not an advance
const ADVANCE_EPSILON_SECS: f64 = 0.001;

/// Inputs to the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    /// Position sample (`timeupdate`)
    TimeUpdate { position: f64, paused: bool },
    /// Media error telemetry
    Error,
    Ended,
    Detached,
    /// Periodic stall check with the analyzer's exhaustion verdict
    Tick { exhausted: bool },
    HealDispatched,
    HealSucceeded,
    HealFailed { fatal: bool },
    ResetStarted,
    ResetCompleted,
    Signal(SignalKind),
}

impl MonitorEvent {
    /// Short tag used as the transition cause
    pub fn tag(&self) -> &'static str {
        match self {
            MonitorEvent::TimeUpdate { .. } => "timeupdate",
            MonitorEvent::Error => "error",
            MonitorEvent::Ended => "ended",
            MonitorEvent::Detached => "detached",
            MonitorEvent::Tick { .. } => "tick",
            MonitorEvent::HealDispatched => "heal_dispatched",
            MonitorEvent::HealSucceeded => "heal_succeeded",
            MonitorEvent::HealFailed { .. } => "heal_failed",
            MonitorEvent::ResetStarted => "reset_started",
            MonitorEvent::ResetCompleted => "reset_completed",
            MonitorEvent::Signal(_) => "signal",
        }
    }
}

/// Facts produced by a transition
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorFact {
    StateChanged {
        from: MonitorState,
        to: MonitorState,
    },
    StallConfirmed {
        stalled_ms: u64,
        window_ms: u64,
    },
    ProgressResumed {
        from: MonitorState,
    },
    HealTimedOut {
        healing_ms: u64,
    },
    MarkedDead {
        reason: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceTrack {
    pub state: MonitorState,
    pub paused: bool,
    pub last_position: Option<f64>,
    pub last_progress_at: Option<Instant>,
    /// Start of the current uninterrupted progress run
    pub streak_started_at: Option<Instant>,
    /// Reference point for stall confirmation (last advance, attach, dispatch)
    pub stall_clock: Instant,
    pub healing_since: Option<Instant>,
    pub heal_failures: u32,
    pub ever_progressed: bool,
    /// Set by a hard reset, cleared by the next advance
    pub reset_since_progress: bool,
    /// Next recovery must use the aggressive strategy (decoder error)
    pub force_aggressive: bool,
    pub last_trigger_at: Option<Instant>,
    pub media_error: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub track: SourceTrack,
    pub facts: Vec<MonitorFact>,
}

impl Transition {
    pub fn state_changed(&self) -> Option<(MonitorState, MonitorState)> {
        self.facts.iter().find_map(|f| match f {
            MonitorFact::StateChanged { from, to } => Some((*from, *to)),
            _ => None,
        })
    }
}

impl SourceTrack {
    pub fn new(now: Instant) -> Self {
        Self {
            state: MonitorState::Playing,
            paused: false,
            last_position: None,
            last_progress_at: None,
            streak_started_at: None,
            stall_clock: now,
            healing_since: None,
            heal_failures: 0,
            ever_progressed: false,
            reset_since_progress: false,
            force_aggressive: false,
            last_trigger_at: None,
            media_error: false,
        }
    }

    /// Length of the current progress run, ending at the last advance
    pub fn progress_streak_ms(&self) -> u64 {
        match (self.streak_started_at, self.last_progress_at) {
            (Some(start), Some(last)) => elapsed_ms(start, last),
            _ => 0,
        }
    }

    pub fn trigger_recent(&self, now: Instant, config: &StallConfig) -> bool {
        self.last_trigger_at
            .map_or(false, |at| elapsed_ms(at, now) < config.trigger_window_ms)
    }

    /// Confirmation window for a stall at `now`
    pub fn stall_window_ms(&self, exhausted: bool, now: Instant, config: &StallConfig) -> u64 {
        if exhausted || self.trigger_recent(now, config) {
            config.confirm_ms
        } else {
            config.confirm_ms + config.not_exhausted_extension_ms
        }
    }

    pub fn apply(&self, event: &MonitorEvent, now: Instant, config: &StallConfig) -> Transition {
        let mut next = self.clone();
        let mut facts = Vec::new();

        if self.state == MonitorState::Dead {
            return Transition { track: next, facts };
        }

        match event {
            MonitorEvent::TimeUpdate { position, paused } => {
                let advanced = self
                    .last_position
                    .map_or(false, |last| *position > last + ADVANCE_EPSILON_SECS);

                next.last_position = Some(*position);
                next.paused = *paused;

                if *paused {
                    next.streak_started_at = None;
                    next.stall_clock = now;
                } else if advanced {
                    next.on_advance(now, &mut facts);
                } else if self.paused {
                    // Resumed but not yet moving: start the stall clock fresh
                    next.stall_clock = now;
                }
            }

            MonitorEvent::Error => {
                next.media_error = true;
                next.streak_started_at = None;
                next.set_state(MonitorState::Error, &mut facts);
            }

            MonitorEvent::Ended => next.mark_dead("ended", &mut facts),
            MonitorEvent::Detached => next.mark_dead("detached", &mut facts),

            MonitorEvent::Tick { exhausted } => match self.state {
                MonitorState::Playing if !self.paused => {
                    let stalled_ms = elapsed_ms(self.stall_clock, now);
                    let window_ms = self.stall_window_ms(*exhausted, now, config);
                    if stalled_ms >= window_ms {
                        next.streak_started_at = None;
                        next.set_state(MonitorState::Stalled, &mut facts);
                        facts.push(MonitorFact::StallConfirmed {
                            stalled_ms,
                            window_ms,
                        });
                    }
                }
                MonitorState::Healing => {
                    if let Some(since) = self.healing_since {
                        let healing_ms = elapsed_ms(since, now);
                        if healing_ms >= config.heal_timeout_ms {
                            next.healing_since = None;
                            next.stall_clock = now;
                            facts.push(MonitorFact::HealTimedOut { healing_ms });
                            next.record_failure(MonitorState::Stalled, config, &mut facts);
                        }
                    }
                }
                _ => {}
            },

            MonitorEvent::HealDispatched => {
                next.healing_since = Some(now);
                next.stall_clock = now;
                next.set_state(MonitorState::Healing, &mut facts);
            }

            MonitorEvent::HealSucceeded => {
                // Stays Healing until an advance confirms it
                next.force_aggressive = false;
            }

            MonitorEvent::HealFailed { fatal } => {
                next.healing_since = None;
                next.stall_clock = now;
                let target = if *fatal {
                    MonitorState::Error
                } else {
                    MonitorState::Stalled
                };
                next.record_failure(target, config, &mut facts);
            }

            MonitorEvent::ResetStarted => {
                next.reset_since_progress = true;
                next.force_aggressive = false;
                next.streak_started_at = None;
                next.set_state(MonitorState::ResetPending, &mut facts);
            }

            MonitorEvent::ResetCompleted => {
                if self.state == MonitorState::ResetPending {
                    next.media_error = false;
                    next.healing_since = Some(now);
                    next.stall_clock = now;
                    next.set_state(MonitorState::Healing, &mut facts);
                }
            }

            MonitorEvent::Signal(kind) => match kind {
                SignalKind::AdDetected | SignalKind::TriggerDetected => {
                    next.last_trigger_at = Some(now);
                }
                SignalKind::DecoderError => {
                    next.force_aggressive = true;
                    next.streak_started_at = None;
                    if self.state != MonitorState::ResetPending {
                        next.set_state(MonitorState::Error, &mut facts);
                    }
                }
                SignalKind::AvSyncIssue | SignalKind::Other => {}
            },
        }

        Transition { track: next, facts }
    }

    fn set_state(&mut self, to: MonitorState, facts: &mut Vec<MonitorFact>) {
        if self.state != to {
            facts.push(MonitorFact::StateChanged {
                from: self.state,
                to,
            });
            self.state = to;
        }
    }

    fn on_advance(&mut self, now: Instant, facts: &mut Vec<MonitorFact>) {
        self.last_progress_at = Some(now);
        if self.streak_started_at.is_none() {
            self.streak_started_at = Some(now);
        }
        self.stall_clock = now;
        self.ever_progressed = true;
        self.reset_since_progress = false;
        self.heal_failures = 0;

        match self.state {
            MonitorState::Stalled | MonitorState::Healing | MonitorState::Error => {
                let from = self.state;
                self.healing_since = None;
                self.media_error = false;
                self.set_state(MonitorState::Playing, facts);
                facts.push(MonitorFact::ProgressResumed { from });
            }
            _ => {}
        }
    }

    fn record_failure(&mut self, to: MonitorState, config: &StallConfig, facts: &mut Vec<MonitorFact>) {
        self.heal_failures = self.heal_failures.saturating_add(1);
        if self.heal_failures >= config.max_heal_failures && !self.ever_progressed {
            self.mark_dead("heal_failures_exhausted", facts);
        } else {
            self.set_state(to, facts);
        }
    }

    fn mark_dead(&mut self, reason: &'static str, facts: &mut Vec<MonitorFact>) {
        self.streak_started_at = None;
        self.healing_since = None;
        self.set_state(MonitorState::Dead, facts);
        facts.push(MonitorFact::MarkedDead { reason });
    }
}
