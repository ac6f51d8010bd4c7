// File audio backend
//
// Stands in for the sound card on machines without one:
// - Microphone: a WAV recording replayed in fixed-size blocks at real-time pace
// - Output: the playback timeline rendered against the wall clock, optionally
//   written to a WAV file

use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::backend::{
    unavailable, AudioDevices, AudioOutput, CaptureConfig, CapturedBlock, Microphone,
    OutputConfig,
};
use super::pcm::PlaybackBuffer;
use super::playback::BufferId;
use super::timeline::{lock_timeline, SharedTimeline, Timeline};
use crate::error::ConciergeResult;
use crate::session::{EventSink, SessionEvent};

/// How often the file output renders its timeline
const RENDER_INTERVAL: Duration = Duration::from_millis(20);

/// A WAV file decoded to normalized samples
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved samples normalized to -1.0..1.0
    pub samples: Vec<f32>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        let samples: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?,
            SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<Vec<_>, _>>()
                    .context("Failed to read audio samples")?
            }
        };

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Mono samples at the requested rate, averaging channels
    pub fn to_mono(&self, target_rate: u32) -> Result<Vec<f32>> {
        if self.sample_rate != target_rate {
            anyhow::bail!(
                "Resampling not supported. Expected {}Hz, got {}Hz",
                target_rate,
                self.sample_rate
            );
        }

        let channels = self.channels.max(1) as usize;
        if channels == 1 {
            return Ok(self.samples.clone());
        }

        Ok(self
            .samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect())
    }
}

/// WAV recording replayed as a microphone
pub struct WavMicrophone {
    name: String,
    samples: Arc<Vec<f32>>,
    config: CaptureConfig,
    capturing: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl WavMicrophone {
    pub fn open(path: impl AsRef<Path>, config: CaptureConfig) -> Result<Self> {
        let audio = AudioFile::open(&path)?;
        let samples = audio.to_mono(config.sample_rate)?;

        Ok(Self {
            name: format!("WAV input ({})", audio.path),
            samples: Arc::new(samples),
            config,
            capturing: Arc::new(AtomicBool::new(false)),
            task: None,
        })
    }

    /// Total number of fixed-size blocks this recording yields
    pub fn block_count(&self) -> usize {
        self.samples.len().div_ceil(self.config.frame_size.max(1))
    }
}

#[async_trait::async_trait]
impl Microphone for WavMicrophone {
    async fn start(&mut self) -> Result<mpsc::Receiver<CapturedBlock>> {
        if self.capturing.load(Ordering::SeqCst) {
            anyhow::bail!("Already capturing");
        }

        let (tx, rx) = mpsc::channel(32);
        let samples = Arc::clone(&self.samples);
        let capturing = Arc::clone(&self.capturing);
        let frame_size = self.config.frame_size.max(1);
        let sample_rate = self.config.sample_rate;
        let period = Duration::from_secs_f64(frame_size as f64 / sample_rate as f64);

        capturing.store(true, Ordering::SeqCst);
        info!(
            "Starting {} ({} samples per block, every {:?})",
            self.name, frame_size, period
        );

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);

            for (index, block) in samples.chunks(frame_size).enumerate() {
                ticker.tick().await;

                if !capturing.load(Ordering::SeqCst) {
                    break;
                }

                // Hardware delivers full blocks; pad the tail with silence
                let mut block = block.to_vec();
                block.resize(frame_size, 0.0);

                let captured = CapturedBlock {
                    samples: block,
                    sample_rate,
                    timestamp_ms: (index * frame_size) as u64 * 1000 / sample_rate as u64,
                };

                if tx.send(captured).await.is_err() {
                    debug!("Capture receiver dropped");
                    break;
                }
            }

            capturing.store(false, Ordering::SeqCst);
            info!("WAV input exhausted");
        }));

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.capturing.store(false, Ordering::SeqCst);

        if let Some(task) = self.task.take() {
            task.abort();
        }

        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for WavMicrophone {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Writes rendered output to disk as a 16-bit WAV file
struct RenderWriter {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    path: PathBuf,
    frames_written: u64,
}

impl RenderWriter {
    fn create(path: PathBuf, sample_rate: u32, channels: u16) -> Result<Self> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let writer = hound::WavWriter::create(&path, spec)
            .with_context(|| format!("Failed to create WAV file: {:?}", path))?;

        Ok(Self {
            writer: Some(writer),
            path,
            frames_written: 0,
        })
    }

    fn write_block(&mut self, block: &[f32], channels: u16) -> Result<()> {
        if let Some(writer) = &mut self.writer {
            for &sample in block {
                writer
                    .write_sample((sample * 32767.0) as i16)
                    .context("Failed to write sample to WAV")?;
            }
            self.frames_written += (block.len() / channels.max(1) as usize) as u64;
        }

        Ok(())
    }

    fn finish(mut self) -> Result<u64> {
        if let Some(writer) = self.writer.take() {
            writer.finalize().context("Failed to finalize WAV file")?;
        }

        info!(
            "Rendered output saved: {} ({} frames)",
            self.path.display(),
            self.frames_written
        );

        Ok(self.frames_written)
    }
}

impl Drop for RenderWriter {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                warn!("Failed to finalize WAV writer on drop: {}", e);
            }
        }
    }
}

/// Output device driven by the wall clock instead of a sound card
pub struct WavOutput {
    name: String,
    timeline: SharedTimeline,
    shutdown: Option<oneshot::Sender<()>>,
}

impl WavOutput {
    /// Start the render loop. Must be called inside a tokio runtime.
    pub fn open(config: &OutputConfig, path: Option<PathBuf>, events: EventSink) -> Result<Self> {
        let timeline = Timeline::shared(config.sample_rate, config.channels);
        let channels = config.channels.max(1);
        let sample_rate = config.sample_rate;

        let mut writer = match &path {
            Some(p) => Some(RenderWriter::create(p.clone(), sample_rate, channels)?),
            None => None,
        };

        let name = match &path {
            Some(p) => format!("WAV output ({})", p.display()),
            None => "virtual output".to_string(),
        };

        info!("Opening {} ({}Hz, {} channels)", name, sample_rate, channels);

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let render_timeline = Arc::clone(&timeline);

        tokio::spawn(async move {
            let started = tokio::time::Instant::now();
            let mut ticker = tokio::time::interval(RENDER_INTERVAL);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        let target = (started.elapsed().as_secs_f64() * sample_rate as f64) as u64;
                        let mut block = Vec::new();
                        let ended = {
                            let mut timeline = lock_timeline(&render_timeline);
                            let frames = target.saturating_sub(timeline.frames_rendered()) as usize;
                            block.resize(frames * channels as usize, 0.0);
                            timeline.render(&mut block)
                        };

                        if let Some(w) = &mut writer {
                            if let Err(e) = w.write_block(&block, channels) {
                                error!("Failed to write rendered audio: {:#}", e);
                                writer = None;
                            }
                        }

                        for id in ended {
                            events.send(SessionEvent::PlaybackEnded(id));
                        }
                    }
                }
            }

            if let Some(w) = writer.take() {
                if let Err(e) = w.finish() {
                    error!("Failed to finish rendered output: {:#}", e);
                }
            }

            debug!("Output render loop stopped");
        });

        Ok(Self {
            name,
            timeline,
            shutdown: Some(shutdown_tx),
        })
    }
}

impl AudioOutput for WavOutput {
    fn current_time(&self) -> f64 {
        lock_timeline(&self.timeline).current_time()
    }

    fn schedule(
        &mut self,
        id: BufferId,
        buffer: PlaybackBuffer,
        start_at: f64,
    ) -> ConciergeResult<()> {
        if self.shutdown.is_none() {
            return Err(crate::error::ConciergeError::SessionClosed);
        }

        lock_timeline(&self.timeline).insert(id, buffer.samples, start_at);
        Ok(())
    }

    fn stop(&mut self, id: BufferId) {
        lock_timeline(&self.timeline).remove(id);
    }

    fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            info!("Closing {}", self.name);
            let _ = shutdown.send(());
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for WavOutput {
    fn drop(&mut self) {
        self.close();
    }
}

/// Device backend reading a WAV recording and rendering to an optional WAV file
pub struct FileDevices {
    input: Option<PathBuf>,
    output: Option<PathBuf>,
}

impl FileDevices {
    pub fn new(input: Option<PathBuf>, output: Option<PathBuf>) -> Self {
        Self { input, output }
    }
}

#[async_trait::async_trait]
impl AudioDevices for FileDevices {
    async fn request_microphone(
        &self,
        config: &CaptureConfig,
    ) -> ConciergeResult<Box<dyn Microphone>> {
        let path = self
            .input
            .clone()
            .ok_or_else(|| unavailable("no WAV input configured"))?;
        let config = config.clone();

        let microphone = tokio::task::spawn_blocking(move || WavMicrophone::open(path, config))
            .await
            .map_err(|e| unavailable(format!("WAV loader panicked: {}", e)))?
            .map_err(|e| unavailable(format!("{:#}", e)))?;

        Ok(Box::new(microphone))
    }

    async fn open_output(
        &self,
        config: &OutputConfig,
        events: EventSink,
    ) -> ConciergeResult<Box<dyn AudioOutput>> {
        let output = WavOutput::open(config, self.output.clone(), events)
            .map_err(|e| unavailable(format!("{:#}", e)))?;

        Ok(Box::new(output))
    }

    fn name(&self) -> &str {
        "file"
    }
}
