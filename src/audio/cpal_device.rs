//! Sound card capture and playback using cpal
//!
//! cpal streams are `!Send` on some platforms, so each stream lives on a
//! dedicated thread that owns it until told to stop.

use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::backend::{
    unavailable, AudioDevices, AudioOutput, CaptureConfig, CapturedBlock, Microphone,
    OutputConfig,
};
use super::pcm::PlaybackBuffer;
use super::playback::BufferId;
use super::timeline::{lock_timeline, SharedTimeline, Timeline};
use crate::error::{ConciergeError, ConciergeResult};
use crate::session::{EventSink, SessionEvent};

enum StreamCommand {
    Play,
    Stop,
}

/// Spawn a thread that builds a stream, reports the outcome, then parks on commands
fn spawn_stream_thread<F>(
    name: &str,
    build: F,
) -> ConciergeResult<(std_mpsc::Sender<StreamCommand>, JoinHandle<()>)>
where
    F: FnOnce() -> ConciergeResult<cpal::Stream> + Send + 'static,
{
    let (command_tx, command_rx) = std_mpsc::channel::<StreamCommand>();
    let (ready_tx, ready_rx) = std_mpsc::sync_channel::<ConciergeResult<()>>(1);
    let thread_name = name.to_string();

    let handle = std::thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || {
            let stream = match build() {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            while let Ok(command) = command_rx.recv() {
                match command {
                    StreamCommand::Play => {
                        if let Err(e) = stream.play() {
                            warn!("{}: failed to start stream: {}", thread_name, e);
                        }
                    }
                    StreamCommand::Stop => break,
                }
            }

            drop(stream);
            debug!("{}: stream released", thread_name);
        })
        .map_err(|e| unavailable(format!("failed to spawn audio thread: {}", e)))?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok((command_tx, handle)),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(unavailable("audio thread exited before the stream was built")),
    }
}

fn map_build_error(err: cpal::BuildStreamError) -> ConciergeError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => unavailable("device not available"),
        // Backends surface OS-level access refusal as backend-specific errors
        cpal::BuildStreamError::BackendSpecific { err } => {
            ConciergeError::PermissionDenied(err.to_string())
        }
        other => unavailable(other.to_string()),
    }
}

/// Default input device, accumulating fixed-size blocks
pub struct CpalMicrophone {
    name: String,
    commands: Option<std_mpsc::Sender<StreamCommand>>,
    thread: Option<JoinHandle<()>>,
    blocks: Option<mpsc::Receiver<CapturedBlock>>,
    capturing: Arc<AtomicBool>,
}

impl CpalMicrophone {
    /// Acquire the default input device and build a paused stream
    pub fn acquire(config: &CaptureConfig) -> ConciergeResult<Self> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| unavailable("No input device available"))?;

        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!("Using input device: {}", name);

        let stream_config = StreamConfig {
            channels: config.channels,
            sample_rate: SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (block_tx, block_rx) = mpsc::channel::<CapturedBlock>(64);
        let capturing = Arc::new(AtomicBool::new(false));
        let frame_size = config.frame_size.max(1);
        let channels = config.channels.max(1) as usize;
        let sample_rate = config.sample_rate;
        let callback_capturing = Arc::clone(&capturing);

        let (commands, thread) = spawn_stream_thread("concierge-capture", move || {
            let started = Instant::now();
            let mut pending = Vec::with_capacity(frame_size);

            let stream = device
                .build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if !callback_capturing.load(Ordering::Relaxed) {
                            return;
                        }

                        // Keep the first channel of each interleaved frame
                        for frame in data.chunks(channels) {
                            pending.push(frame[0]);

                            if pending.len() >= frame_size {
                                let block = CapturedBlock {
                                    samples: std::mem::replace(
                                        &mut pending,
                                        Vec::with_capacity(frame_size),
                                    ),
                                    sample_rate,
                                    timestamp_ms: started.elapsed().as_millis() as u64,
                                };

                                if block_tx.try_send(block).is_err() {
                                    warn!("Capture consumer lagging, dropped a block");
                                }
                            }
                        }
                    },
                    move |err| {
                        warn!("Input stream error: {}", err);
                    },
                    None,
                )
                .map_err(map_build_error)?;

            Ok(stream)
        })?;

        Ok(Self {
            name,
            commands: Some(commands),
            thread: Some(thread),
            blocks: Some(block_rx),
            capturing,
        })
    }

    fn signal_stop(&mut self) {
        self.capturing.store(false, Ordering::SeqCst);

        if let Some(commands) = self.commands.take() {
            let _ = commands.send(StreamCommand::Stop);
        }
    }

    fn release(&mut self) {
        self.signal_stop();

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Capture thread panicked");
            }
        }
    }
}

#[async_trait::async_trait]
impl Microphone for CpalMicrophone {
    async fn start(&mut self) -> Result<mpsc::Receiver<CapturedBlock>> {
        let blocks = self
            .blocks
            .take()
            .ok_or_else(|| anyhow::anyhow!("Microphone already started"))?;

        let commands = self
            .commands
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Microphone already released"))?;

        self.capturing.store(true, Ordering::SeqCst);
        commands
            .send(StreamCommand::Play)
            .map_err(|_| anyhow::anyhow!("Capture thread is gone"))?;

        info!("Microphone capture started");
        Ok(blocks)
    }

    async fn stop(&mut self) -> Result<()> {
        self.signal_stop();

        if let Some(thread) = self.thread.take() {
            if tokio::task::spawn_blocking(move || thread.join()).await?.is_err() {
                warn!("Capture thread panicked");
            }
        }

        info!("Microphone capture stopped");
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        self.release();
    }
}

/// Default output device rendering the shared playback timeline
pub struct CpalOutput {
    name: String,
    timeline: SharedTimeline,
    commands: Option<std_mpsc::Sender<StreamCommand>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalOutput {
    pub fn open(config: &OutputConfig, events: EventSink) -> ConciergeResult<Self> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or_else(|| unavailable("No output device available"))?;

        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!(
            "Using output device: {} ({}Hz, {} channels)",
            name, config.sample_rate, config.channels
        );

        let stream_config = StreamConfig {
            channels: config.channels,
            sample_rate: SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let timeline = Timeline::shared(config.sample_rate, config.channels);
        let render_timeline = Arc::clone(&timeline);

        let (commands, thread) = spawn_stream_thread("concierge-playback", move || {
            let stream = device
                .build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let ended = lock_timeline(&render_timeline).render(data);
                        for id in ended {
                            events.send(SessionEvent::PlaybackEnded(id));
                        }
                    },
                    move |err| {
                        warn!("Output stream error: {}", err);
                    },
                    None,
                )
                .map_err(map_build_error)?;

            Ok(stream)
        })?;

        commands
            .send(StreamCommand::Play)
            .map_err(|_| unavailable("playback thread is gone"))?;

        Ok(Self {
            name,
            timeline,
            commands: Some(commands),
            thread: Some(thread),
        })
    }
}

impl AudioOutput for CpalOutput {
    fn current_time(&self) -> f64 {
        lock_timeline(&self.timeline).current_time()
    }

    fn schedule(
        &mut self,
        id: BufferId,
        buffer: PlaybackBuffer,
        start_at: f64,
    ) -> ConciergeResult<()> {
        if self.commands.is_none() {
            return Err(ConciergeError::SessionClosed);
        }

        lock_timeline(&self.timeline).insert(id, buffer.samples, start_at);
        Ok(())
    }

    fn stop(&mut self, id: BufferId) {
        lock_timeline(&self.timeline).remove(id);
    }

    fn close(&mut self) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(StreamCommand::Stop);
            info!("Output device closed");
        }

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Playback thread panicked");
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

/// Device backend for the default sound card
pub struct CpalDevices;

impl CpalDevices {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CpalDevices {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl AudioDevices for CpalDevices {
    async fn request_microphone(
        &self,
        config: &CaptureConfig,
    ) -> ConciergeResult<Box<dyn Microphone>> {
        let config = config.clone();
        let microphone = tokio::task::spawn_blocking(move || CpalMicrophone::acquire(&config))
            .await
            .map_err(|e| unavailable(format!("capture setup panicked: {}", e)))??;

        Ok(Box::new(microphone))
    }

    async fn open_output(
        &self,
        config: &OutputConfig,
        events: EventSink,
    ) -> ConciergeResult<Box<dyn AudioOutput>> {
        // Building the stream waits on the device thread
        let config = config.clone();
        let output = tokio::task::spawn_blocking(move || CpalOutput::open(&config, events))
            .await
            .map_err(|e| unavailable(format!("playback setup panicked: {}", e)))??;

        Ok(Box::new(output))
    }

    fn name(&self) -> &str {
        "cpal"
    }
}
