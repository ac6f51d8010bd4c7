//! Gapless playback scheduling
//!
//! Inbound chunks arrive over the network at irregular intervals. Each one is
//! placed on the output clock at `max(next_start_time, now)` and the cursor is
//! advanced by the chunk duration, so consecutive chunks play back-to-back and
//! nothing is ever scheduled in the past.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Opaque handle for a scheduled output buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BufferId(u64);

impl BufferId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for BufferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where the schedule cursor goes after a barge-in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterruptReset {
    /// Reset to 0.0
    #[default]
    Zero,
    /// Reset to the output clock at the moment of interruption
    Clock,
}

/// A buffer placed on the output timeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledBuffer {
    pub id: BufferId,
    /// Output clock time (seconds) at which playback begins
    pub start_at: f64,
    /// Length in seconds
    pub duration: f64,
}

impl ScheduledBuffer {
    pub fn end_at(&self) -> f64 {
        self.start_at + self.duration
    }
}

/// Single-owner playback timeline: the schedule cursor and the active set
#[derive(Debug)]
pub struct PlaybackScheduler {
    next_start_time: f64,
    active: HashMap<BufferId, ScheduledBuffer>,
    next_id: u64,
    reset: InterruptReset,
}

impl PlaybackScheduler {
    pub fn new(reset: InterruptReset) -> Self {
        Self {
            next_start_time: 0.0,
            active: HashMap::new(),
            next_id: 0,
            reset,
        }
    }

    /// Place a buffer of `duration` seconds on the timeline
    pub fn schedule(&mut self, duration: f64, now: f64) -> ScheduledBuffer {
        let start_at = self.next_start_time.max(now);
        let id = BufferId(self.next_id);
        self.next_id += 1;

        let scheduled = ScheduledBuffer {
            id,
            start_at,
            duration,
        };

        self.next_start_time = scheduled.end_at();
        self.active.insert(id, scheduled);

        debug!(
            "Scheduled buffer {} at {:.3}s ({:.3}s long, next start {:.3}s)",
            id, start_at, duration, self.next_start_time
        );

        scheduled
    }

    /// Remove a buffer whose playback finished. Returns false for unknown ids.
    pub fn ended(&mut self, id: BufferId) -> bool {
        self.active.remove(&id).is_some()
    }

    /// Drop every scheduled/playing buffer and reset the cursor.
    ///
    /// Returns the ids that must be stopped on the output device, oldest first.
    pub fn interrupt(&mut self, now: f64) -> Vec<BufferId> {
        let stopped = self.drain();

        self.next_start_time = match self.reset {
            InterruptReset::Zero => 0.0,
            InterruptReset::Clock => now,
        };

        stopped
    }

    /// Drop every buffer without touching the cursor (teardown path)
    pub fn drain(&mut self) -> Vec<BufferId> {
        let mut ids: Vec<BufferId> = self.active.drain().map(|(id, _)| id).collect();
        ids.sort();
        ids
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_active(&self, id: BufferId) -> bool {
        self.active.contains_key(&id)
    }

    pub fn reset_mode(&self) -> InterruptReset {
        self.reset
    }
}

impl Default for PlaybackScheduler {
    fn default() -> Self {
        Self::new(InterruptReset::default())
    }
}
