pub mod audio;
pub mod config;
pub mod error;
pub mod http;
pub mod session;
pub mod transport;

pub use audio::{
    AudioBackendKind, AudioDevices, AudioDevicesFactory, AudioOutput, BufferId, CaptureConfig,
    CapturedBlock, FileDevices, InterruptReset, Microphone, OutputConfig, PlaybackBuffer,
    PlaybackScheduler,
};
pub use config::Config;
pub use error::{ConciergeError, ConciergeResult};
pub use http::{create_router, AppState};
pub use session::{
    ConciergeHandle, ConnectionState, EventSink, SessionConfig, SessionEvent, StatusSnapshot,
    UiStatus, VoiceSessionManager,
};
pub use transport::{GeminiLiveClient, LiveConnection, LiveTransport, MediaBlob};
