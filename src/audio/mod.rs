pub mod backend;
pub mod file;
pub mod pcm;
pub mod playback;
pub mod timeline;

#[cfg(feature = "device-cpal")]
pub mod cpal_device;

pub use backend::{
    AudioBackendKind, AudioDevices, AudioDevicesFactory, AudioOutput, CaptureConfig,
    CapturedBlock, Microphone, OutputConfig,
};
pub use file::{AudioFile, FileDevices, WavMicrophone, WavOutput};
pub use pcm::{PlaybackBuffer, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
pub use playback::{BufferId, InterruptReset, PlaybackScheduler, ScheduledBuffer};
pub use timeline::{SharedTimeline, Timeline};
