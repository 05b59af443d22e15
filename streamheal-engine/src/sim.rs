//! In-memory playback source
//!
//! Scripted buffered ranges, a position that advances only through
//! `advance`, queued play failures, a `play` that can be made to hang, and
//! call counters. Used by tests and by
//! the scenario replay binary.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use crate::buffer::{analyzer, BufferRange};
use crate::source::{NetworkState, PlayError, PlaybackSource, ReadyState};

#[derive(Debug)]
struct SimState {
    ranges: Vec<BufferRange>,
    position: f64,
    paused: bool,
    ended: bool,
    attached: bool,
    fallback_src: bool,
    media_error: bool,
    network_state: NetworkState,
    play_failures: VecDeque<PlayError>,
    play_hangs: bool,
    reload_ranges: Option<Vec<BufferRange>>,
    seek_count: u32,
    play_count: u32,
    reload_count: u32,
}

#[derive(Debug)]
pub struct SimulatedSource {
    state: Mutex<SimState>,
}

/// Sort by start and merge overlapping or touching ranges
fn normalize(mut ranges: Vec<BufferRange>) -> Vec<BufferRange> {
    ranges.sort_by(|a, b| a.start.total_cmp(&b.start));
    let mut merged: Vec<BufferRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.start <= last.end => last.end = last.end.max(range.end),
            _ => merged.push(range),
        }
    }
    merged
}

impl SimulatedSource {
    /// Playing (not paused) source at `position` with `ranges` buffered
    pub fn new(ranges: Vec<BufferRange>, position: f64) -> Self {
        Self {
            state: Mutex::new(SimState {
                ranges: normalize(ranges),
                position,
                paused: false,
                ended: false,
                attached: true,
                fallback_src: false,
                media_error: false,
                network_state: NetworkState::Loading,
                play_failures: VecDeque::new(),
                play_hangs: false,
                reload_ranges: None,
                seek_count: 0,
                play_count: 0,
                reload_count: 0,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Play forward by `secs`; stops at the end of the containing range
    pub fn advance(&self, secs: f64) {
        let mut state = self.state();
        if state.paused || state.ended || !state.attached {
            return;
        }
        if let Some(range) = analyzer::containing_range(&state.ranges, state.position) {
            state.position = (state.position + secs).min(range.end);
        }
    }

    pub fn append_range(&self, range: BufferRange) {
        let mut state = self.state();
        let mut ranges = std::mem::take(&mut state.ranges);
        ranges.push(range);
        state.ranges = normalize(ranges);
    }

    pub fn set_ranges(&self, ranges: Vec<BufferRange>) {
        self.state().ranges = normalize(ranges);
    }

    /// Ranges the source reports after the next `reload`
    pub fn set_reload_ranges(&self, ranges: Vec<BufferRange>) {
        self.state().reload_ranges = Some(normalize(ranges));
    }

    /// Errors returned by the next `play` calls, in order
    pub fn queue_play_failures(&self, failures: impl IntoIterator<Item = PlayError>) {
        self.state().play_failures.extend(failures);
    }

    /// While set, `play` never settles
    pub fn set_play_hangs(&self, hangs: bool) {
        self.state().play_hangs = hangs;
    }

    pub fn set_paused(&self, paused: bool) {
        self.state().paused = paused;
    }

    pub fn detach(&self) {
        self.state().attached = false;
    }

    pub fn end(&self) {
        let mut state = self.state();
        state.ended = true;
        state.paused = true;
    }

    pub fn set_fallback_src(&self, fallback: bool) {
        self.state().fallback_src = fallback;
    }

    pub fn set_media_error(&self, error: bool) {
        self.state().media_error = error;
    }

    pub fn set_network_state(&self, network_state: NetworkState) {
        self.state().network_state = network_state;
    }

    pub fn seek_count(&self) -> u32 {
        self.state().seek_count
    }

    /// Every `play` call, failed ones included
    pub fn play_count(&self) -> u32 {
        self.state().play_count
    }

    pub fn reload_count(&self) -> u32 {
        self.state().reload_count
    }
}

#[async_trait]
impl PlaybackSource for SimulatedSource {
    fn position(&self) -> f64 {
        self.state().position
    }

    fn is_paused(&self) -> bool {
        self.state().paused
    }

    fn is_ended(&self) -> bool {
        self.state().ended
    }

    fn is_attached(&self) -> bool {
        self.state().attached
    }

    fn uses_fallback_src(&self) -> bool {
        self.state().fallback_src
    }

    fn has_media_error(&self) -> bool {
        self.state().media_error
    }

    fn ready_state(&self) -> ReadyState {
        let state = self.state();
        if state.ranges.is_empty() {
            return ReadyState::HaveNothing;
        }
        match analyzer::containing_range(&state.ranges, state.position) {
            None => ReadyState::HaveMetadata,
            Some(range) => {
                let ahead = range.end - state.position;
                if ahead < analyzer::EXHAUSTED_REMAINING_SECS {
                    ReadyState::HaveCurrentData
                } else if ahead < 3.0 {
                    ReadyState::HaveFutureData
                } else {
                    ReadyState::HaveEnoughData
                }
            }
        }
    }

    fn network_state(&self) -> NetworkState {
        self.state().network_state
    }

    fn buffered(&self) -> Vec<BufferRange> {
        self.state().ranges.clone()
    }

    async fn play(&self) -> Result<(), PlayError> {
        let hangs = {
            let mut state = self.state();
            state.play_count += 1;
            state.play_hangs
        };
        if hangs {
            return std::future::pending().await;
        }

        let mut state = self.state();
        match state.play_failures.pop_front() {
            Some(error) => {
                state.paused = true;
                Err(error)
            }
            None => {
                state.paused = false;
                Ok(())
            }
        }
    }

    async fn seek(&self, position: f64) -> Result<(), PlayError> {
        let mut state = self.state();
        state.seek_count += 1;
        state.position = position;
        Ok(())
    }

    fn pause(&self) {
        self.state().paused = true;
    }

    async fn reload(&self) -> Result<(), PlayError> {
        let mut state = self.state();
        state.reload_count += 1;
        if let Some(ranges) = state.reload_ranges.take() {
            state.ranges = ranges;
        }
        state.position = state.ranges.first().map_or(0.0, |r| r.start);
        state.paused = true;
        state.media_error = false;
        Ok(())
    }
}
