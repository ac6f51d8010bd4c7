use tracing::{debug, info, warn};

use crate::audio::pcm;
use crate::audio::{AudioOutput, BufferId, InterruptReset, PlaybackScheduler, ScheduledBuffer};
use crate::error::ConciergeResult;

/// Decodes inbound chunks and keeps them gapless on the output clock.
///
/// Owns the output device for the lifetime of one session; dropping the
/// pipeline (or calling `shutdown`) stops everything and releases the device.
pub struct PlaybackPipeline {
    output: Box<dyn AudioOutput>,
    scheduler: PlaybackScheduler,
    sample_rate: u32,
    released: bool,
}

impl PlaybackPipeline {
    pub fn new(output: Box<dyn AudioOutput>, sample_rate: u32, reset: InterruptReset) -> Self {
        info!("Playback ready on {} ({}Hz)", output.name(), sample_rate);

        Self {
            output,
            scheduler: PlaybackScheduler::new(reset),
            sample_rate,
            released: false,
        }
    }

    /// Decode one base64 chunk and schedule it after everything already queued
    pub fn play_chunk(&mut self, data: &str) -> ConciergeResult<Option<ScheduledBuffer>> {
        let buffer = pcm::decode_chunk(data, self.sample_rate)?;
        if buffer.is_empty() {
            return Ok(None);
        }

        let now = self.output.current_time();
        let scheduled = self.scheduler.schedule(buffer.duration(), now);

        if let Err(e) = self.output.schedule(scheduled.id, buffer, scheduled.start_at) {
            self.scheduler.ended(scheduled.id);
            return Err(e);
        }

        Ok(Some(scheduled))
    }

    /// Barge-in: stop every pending or playing buffer and reset the cursor
    pub fn interrupt(&mut self) -> usize {
        let now = self.output.current_time();
        let stopped = self.scheduler.interrupt(now);

        for id in &stopped {
            self.output.stop(*id);
        }

        debug!(
            "Interrupted playback at {:.3}s, next start reset to {:.3}s",
            now,
            self.scheduler.next_start_time()
        );

        stopped.len()
    }

    /// A buffer finished naturally
    pub fn ended(&mut self, id: BufferId) {
        if !self.scheduler.ended(id) {
            debug!("Ignoring end of unknown buffer {}", id);
        }
    }

    /// Stop all output and release the device. May block while the device shuts down.
    pub fn shutdown(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let pending = self.scheduler.drain();
        for id in &pending {
            self.output.stop(*id);
        }

        if !pending.is_empty() {
            warn!("Discarded {} buffers on teardown", pending.len());
        }

        self.output.close();
    }

    pub fn active_count(&self) -> usize {
        self.scheduler.active_count()
    }

    pub fn next_start_time(&self) -> f64 {
        self.scheduler.next_start_time()
    }

    pub fn current_time(&self) -> f64 {
        self.output.current_time()
    }
}

impl Drop for PlaybackPipeline {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::PlaybackBuffer;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Log {
        stopped: Vec<BufferId>,
        closes: usize,
    }

    struct RecordingOutput(Arc<Mutex<Log>>);

    impl AudioOutput for RecordingOutput {
        fn current_time(&self) -> f64 {
            0.0
        }

        fn schedule(&mut self, _: BufferId, _: PlaybackBuffer, _: f64) -> ConciergeResult<()> {
            Ok(())
        }

        fn stop(&mut self, id: BufferId) {
            self.0.lock().unwrap().stopped.push(id);
        }

        fn close(&mut self) {
            self.0.lock().unwrap().closes += 1;
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    fn pipeline() -> (PlaybackPipeline, Arc<Mutex<Log>>) {
        let log = Arc::new(Mutex::new(Log::default()));
        let output = RecordingOutput(Arc::clone(&log));
        (
            PlaybackPipeline::new(Box::new(output), 24000, InterruptReset::Zero),
            log,
        )
    }

    fn chunk(samples: usize) -> String {
        pcm::encode_blob(&vec![0.1; samples], 24000).data
    }

    #[test]
    fn test_shutdown_releases_once() {
        let (mut playback, log) = pipeline();
        playback.play_chunk(&chunk(2400)).unwrap();
        playback.play_chunk(&chunk(2400)).unwrap();

        playback.shutdown();

        let log = log.lock().unwrap();
        assert_eq!(log.stopped.len(), 2);
        // Drop after shutdown does not close the device again
        assert_eq!(log.closes, 1);
    }

    #[test]
    fn test_drop_releases_device() {
        let (mut playback, log) = pipeline();
        playback.play_chunk(&chunk(2400)).unwrap();

        drop(playback);

        let log = log.lock().unwrap();
        assert_eq!(log.stopped.len(), 1);
        assert_eq!(log.closes, 1);
    }
}
