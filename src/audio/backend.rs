use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::pcm::{PlaybackBuffer, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
use super::playback::BufferId;
use crate::error::{ConciergeError, ConciergeResult};
use crate::session::EventSink;

/// One fixed-size block of microphone samples
#[derive(Debug, Clone)]
pub struct CapturedBlock {
    /// Mono samples normalized to -1.0..1.0
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

/// Configuration for microphone capture
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// Capture sample rate (the remote model expects 16kHz)
    pub sample_rate: u32,
    /// Channel count (1 = mono)
    pub channels: u16,
    /// Samples per block handed to the capture pipeline
    pub frame_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: INPUT_SAMPLE_RATE, // 16kHz for the live model
            channels: 1,                    // Mono
            frame_size: 4096,               // ~256ms blocks
        }
    }
}

/// Configuration for the output device
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Output clock rate (synthesized speech is 24kHz)
    pub sample_rate: u32,
    /// Device channel count; mono buffers are duplicated across channels
    pub channels: u16,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            sample_rate: OUTPUT_SAMPLE_RATE,
            channels: 1,
        }
    }
}

/// Microphone capture stream
///
/// Implementations:
/// - cpal: default input device (feature `device-cpal`)
/// - File: paced WAV playback, for headless runs and tests
#[async_trait::async_trait]
pub trait Microphone: Send {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive fixed-size blocks
    async fn start(&mut self) -> Result<mpsc::Receiver<CapturedBlock>>;

    /// Stop capturing audio
    async fn stop(&mut self) -> Result<()>;

    /// Check if the microphone is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get device name for logging
    fn name(&self) -> &str;
}

/// Output device with its own audio clock
///
/// Finished buffers are reported as `SessionEvent::PlaybackEnded` on the
/// event sink handed to `AudioDevices::open_output`.
pub trait AudioOutput: Send {
    /// Output clock in seconds
    fn current_time(&self) -> f64;

    /// Queue a buffer to start at `start_at` on the output clock
    fn schedule(&mut self, id: BufferId, buffer: PlaybackBuffer, start_at: f64)
        -> ConciergeResult<()>;

    /// Stop a buffer immediately, started or not
    fn stop(&mut self, id: BufferId);

    /// Release the device. Further calls are no-ops.
    fn close(&mut self);

    fn name(&self) -> &str;
}

/// Permission-gated access to the capture and output devices
#[async_trait::async_trait]
pub trait AudioDevices: Send + Sync {
    /// Acquire the microphone. Fails if permission is denied or no device exists.
    async fn request_microphone(
        &self,
        config: &CaptureConfig,
    ) -> ConciergeResult<Box<dyn Microphone>>;

    /// Open the output device and start its clock
    async fn open_output(
        &self,
        config: &OutputConfig,
        events: EventSink,
    ) -> ConciergeResult<Box<dyn AudioOutput>>;

    fn name(&self) -> &str;
}

/// Which device backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioBackendKind {
    /// Sound card via cpal
    Cpal,
    /// WAV file in, rendered WAV (or nothing) out
    #[default]
    File,
}

/// Audio device factory
pub struct AudioDevicesFactory;

impl AudioDevicesFactory {
    /// Create the device backend selected in configuration
    pub fn create(
        kind: AudioBackendKind,
        wav_input: Option<PathBuf>,
        wav_output: Option<PathBuf>,
    ) -> Result<Arc<dyn AudioDevices>> {
        match kind {
            AudioBackendKind::Cpal => {
                #[cfg(feature = "device-cpal")]
                {
                    use super::cpal_device::CpalDevices;
                    Ok(Arc::new(CpalDevices::new()))
                }

                #[cfg(not(feature = "device-cpal"))]
                {
                    anyhow::bail!("cpal audio backend requires the `device-cpal` feature")
                }
            }

            AudioBackendKind::File => {
                use super::file::FileDevices;
                Ok(Arc::new(FileDevices::new(wav_input, wav_output)))
            }
        }
    }
}

pub(crate) fn unavailable(msg: impl Into<String>) -> ConciergeError {
    ConciergeError::DeviceUnavailable(msg.into())
}
