// Output timeline for scheduled playback buffers
//
// This module provides the sample-accurate clock behind every output device:
// - Buffers ("voices") are placed at an absolute start frame
// - Rendering walks the clock forward, summing every voice that overlaps
//   the rendered block, with clipping
// - Voices that finish are reported so the session can drop them from the
//   active playback set
//
// Device backends (file render loop, cpal callback) share one timeline behind
// a mutex and call `render` from their own cadence.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use super::playback::BufferId;

/// Timeline shared between an output handle and its render loop
pub type SharedTimeline = Arc<Mutex<Timeline>>;

/// Lock a shared timeline, recovering from a poisoned lock
pub fn lock_timeline(timeline: &SharedTimeline) -> MutexGuard<'_, Timeline> {
    timeline.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Voice {
    start_frame: u64,
    samples: Vec<f32>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Sample clock plus the voices scheduled on it
pub struct Timeline {
    sample_rate: u32,
    channels: u16,
    frames_rendered: u64,
    voices: BTreeMap<BufferId, Voice>,
}

impl Timeline {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels: channels.max(1),
            frames_rendered: 0,
            voices: BTreeMap::new(),
        }
    }

    pub fn shared(sample_rate: u32, channels: u16) -> SharedTimeline {
        Arc::new(Mutex::new(Self::new(sample_rate, channels)))
    }

    /// Output clock in seconds (frames rendered so far)
    pub fn current_time(&self) -> f64 {
        self.frames_rendered as f64 / self.sample_rate as f64
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    pub fn contains(&self, id: BufferId) -> bool {
        self.voices.contains_key(&id)
    }

    /// Place mono samples on the clock at `start_at` seconds
    ///
    /// Start times already in the past are pulled forward to the current
    /// frame rather than dropped.
    pub fn insert(&mut self, id: BufferId, samples: Vec<f32>, start_at: f64) {
        let requested = (start_at.max(0.0) * self.sample_rate as f64).round() as u64;
        let start_frame = requested.max(self.frames_rendered);

        if start_frame > requested {
            warn!(
                "Buffer {} scheduled {} frames in the past, starting now",
                id,
                start_frame - requested
            );
        }

        self.voices.insert(
            id,
            Voice {
                start_frame,
                samples,
            },
        );
    }

    /// Remove a voice immediately, whether or not it started
    pub fn remove(&mut self, id: BufferId) -> bool {
        self.voices.remove(&id).is_some()
    }

    /// Render the next block into `out` (interleaved, `channels` wide)
    ///
    /// Advances the clock by `out.len() / channels` frames and returns the ids
    /// of voices that finished within the block.
    pub fn render(&mut self, out: &mut [f32]) -> Vec<BufferId> {
        let channels = self.channels as usize;
        let frames = (out.len() / channels) as u64;
        let block_start = self.frames_rendered;
        let block_end = block_start + frames;

        out.iter_mut().for_each(|s| *s = 0.0);

        for voice in self.voices.values() {
            let from = voice.start_frame.max(block_start);
            let to = voice.end_frame().min(block_end);
            if from >= to {
                continue;
            }

            for frame in from..to {
                let sample = voice.samples[(frame - voice.start_frame) as usize];
                let base = (frame - block_start) as usize * channels;
                for ch in 0..channels {
                    out[base + ch] += sample;
                }
            }
        }

        // Clip to prevent overflow
        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }

        self.frames_rendered = block_end;

        let ended: Vec<BufferId> = self
            .voices
            .iter()
            .filter(|(_, voice)| voice.end_frame() <= block_end)
            .map(|(id, _)| *id)
            .collect();

        for id in &ended {
            self.voices.remove(id);
            debug!("Buffer {} finished at frame {}", id, block_end);
        }

        ended
    }

    /// Render `frames` frames and discard the audio (clock-only devices)
    pub fn advance(&mut self, frames: usize) -> Vec<BufferId> {
        let mut scratch = vec![0.0; frames * self.channels as usize];
        self.render(&mut scratch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u64) -> BufferId {
        BufferId::new(raw)
    }

    #[test]
    fn test_timeline_creation() {
        let timeline = Timeline::new(24000, 1);

        assert_eq!(timeline.voice_count(), 0);
        assert_eq!(timeline.current_time(), 0.0);
    }

    #[test]
    fn test_render_single_voice() {
        let mut timeline = Timeline::new(4, 1);
        timeline.insert(id(0), vec![0.1, 0.2], 0.5); // frame 2

        let mut out = vec![0.0; 4];
        let ended = timeline.render(&mut out);

        assert_eq!(out, vec![0.0, 0.0, 0.1, 0.2]);
        assert_eq!(ended, vec![id(0)]);
        assert_eq!(timeline.current_time(), 1.0);
    }

    #[test]
    fn test_voice_spanning_blocks() {
        let mut timeline = Timeline::new(4, 1);
        timeline.insert(id(0), vec![0.1, 0.2, 0.3], 0.0);

        let mut out = vec![0.0; 2];
        assert!(timeline.render(&mut out).is_empty());
        assert_eq!(out, vec![0.1, 0.2]);

        let ended = timeline.render(&mut out);
        assert_eq!(out, vec![0.3, 0.0]);
        assert_eq!(ended, vec![id(0)]);
    }

    #[test]
    fn test_overlapping_voices_clip() {
        let mut timeline = Timeline::new(4, 1);
        timeline.insert(id(0), vec![0.8, 0.8], 0.0);
        timeline.insert(id(1), vec![0.5, -0.2], 0.0);

        let mut out = vec![0.0; 2];
        timeline.render(&mut out);

        assert_eq!(out[0], 1.0); // Clipped to max
        assert!((out[1] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_stereo_duplicates_mono() {
        let mut timeline = Timeline::new(4, 2);
        timeline.insert(id(0), vec![0.25], 0.0);

        let mut out = vec![0.0; 4];
        timeline.render(&mut out);

        assert_eq!(out, vec![0.25, 0.25, 0.0, 0.0]);
    }

    #[test]
    fn test_past_start_is_pulled_forward() {
        let mut timeline = Timeline::new(4, 1);
        timeline.advance(4);
        timeline.insert(id(0), vec![0.5], 0.0);

        let mut out = vec![0.0; 1];
        timeline.render(&mut out);

        assert_eq!(out, vec![0.5]);
    }

    #[test]
    fn test_removed_voice_is_silent() {
        let mut timeline = Timeline::new(4, 1);
        timeline.insert(id(0), vec![0.5, 0.5], 0.0);
        assert!(timeline.remove(id(0)));

        let mut out = vec![0.0; 2];
        let ended = timeline.render(&mut out);

        assert_eq!(out, vec![0.0, 0.0]);
        assert!(ended.is_empty());
    }
}
