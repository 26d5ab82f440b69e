//! Gapless playback scheduling for agent audio.
//!
//! Every fragment starts at `max(next_playback_time, device_clock)` and pushes
//! the cursor forward by its duration, so fragments arriving at or above
//! real-time rate play back-to-back without gaps or overlap. Fragments arriving
//! slower than real time leave silence between them.
//!
//! The active set and the cursor sit behind one mutex: fragments arrive on the
//! inbound pump while mute and disconnect stop playback from the caller's task.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::audio::AudioFrame;
use crate::device::{AudioOutput, EntryId};
use crate::error::Result;

/// Playback window assigned to a fragment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledWindow {
    /// Entry id, for cancellation.
    pub id: EntryId,
    /// Start time on the device clock, in seconds.
    pub start: f64,
    /// End time on the device clock, in seconds.
    pub end: f64,
}

#[derive(Debug, Clone, Copy)]
struct PlaybackEntry {
    start: f64,
    end: f64,
}

#[derive(Debug, Default)]
struct SchedulerState {
    next_playback_time: f64,
    active: BTreeMap<EntryId, PlaybackEntry>,
    next_id: EntryId,
}

/// Schedules decoded agent audio onto a playback sink.
pub struct PlaybackScheduler {
    output: Arc<dyn AudioOutput>,
    state: Mutex<SchedulerState>,
    speaking: Arc<watch::Sender<bool>>,
}

impl PlaybackScheduler {
    /// Create a scheduler over `output`, publishing the speaking flag on `speaking`.
    pub fn new(output: Arc<dyn AudioOutput>, speaking: Arc<watch::Sender<bool>>) -> Self {
        let state =
            SchedulerState { next_playback_time: output.current_time(), ..Default::default() };
        Self { output, state: Mutex::new(state), speaking }
    }

    /// Schedule `frame` right after everything already queued.
    ///
    /// Empty frames are ignored and yield `None`.
    pub fn schedule(&self, frame: &AudioFrame) -> Result<Option<ScheduledWindow>> {
        if frame.is_empty() {
            return Ok(None);
        }

        let mut state = self.state.lock();
        let now = self.output.current_time();
        let start = state.next_playback_time.max(now);
        let id = state.next_id;

        self.output.schedule(id, frame, start)?;

        let end = start + frame.duration();
        state.next_id += 1;
        state.next_playback_time = end;
        let was_idle = state.active.is_empty();
        state.active.insert(id, PlaybackEntry { start, end });
        drop(state);

        tracing::debug!(entry = id, start, end, samples = frame.len(), "Scheduled playback");
        if was_idle {
            self.set_speaking(true);
        }

        Ok(Some(ScheduledWindow { id, start, end }))
    }

    /// Record that an entry finished playing on its own.
    ///
    /// Returns `true` if the entry was still active.
    pub fn on_ended(&self, id: EntryId) -> bool {
        let mut state = self.state.lock();
        if state.active.remove(&id).is_none() {
            return false;
        }
        let now_idle = state.active.is_empty();
        drop(state);

        if now_idle {
            tracing::debug!("Agent stopped speaking");
            self.set_speaking(false);
        }
        true
    }

    /// Cancel everything, reset the cursor to the device clock and report silence.
    ///
    /// Returns the number of cancelled entries.
    pub fn stop(&self) -> usize {
        let mut state = self.state.lock();
        let cancelled = std::mem::take(&mut state.active);
        for id in cancelled.keys() {
            self.output.cancel(*id);
        }
        state.next_playback_time = self.output.current_time();
        drop(state);

        if !cancelled.is_empty() {
            tracing::debug!(cancelled = cancelled.len(), "Playback stopped");
        }
        self.set_speaking(false);
        cancelled.len()
    }

    fn set_speaking(&self, speaking: bool) {
        self.speaking.send_if_modified(|current| std::mem::replace(current, speaking) != speaking);
    }

    /// Where the next fragment would start if the device clock stood still.
    pub fn next_playback_time(&self) -> f64 {
        self.state.lock().next_playback_time
    }

    /// Number of scheduled or playing entries.
    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    /// Windows of all active entries, in scheduling order.
    pub fn active_windows(&self) -> Vec<ScheduledWindow> {
        self.state
            .lock()
            .active
            .iter()
            .map(|(id, entry)| ScheduledWindow { id: *id, start: entry.start, end: entry.end })
            .collect()
    }

    /// Whether agent audio is scheduled or playing.
    pub fn is_speaking(&self) -> bool {
        !self.state.lock().active.is_empty()
    }
}

impl std::fmt::Debug for PlaybackScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PlaybackScheduler")
            .field("next_playback_time", &state.next_playback_time)
            .field("active", &state.active.len())
            .finish()
    }
}
