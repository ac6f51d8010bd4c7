//! Voice session management
//!
//! This module provides the `VoiceSessionManager` state machine that manages:
//! - The live session lifecycle (connect, open, close, error)
//! - Microphone capture streamed to the open session
//! - Gapless playback of synthesized audio chunks
//! - Barge-in handling (stop pending output, reset scheduling)
//! - Status reporting to the host display

mod capture;
mod config;
mod events;
mod manager;
mod playback;
mod status;

pub use capture::CapturePipeline;
pub use config::{
    SessionConfig, DEFAULT_ENDPOINT, DEFAULT_MODEL, DEFAULT_PERSONA, DEFAULT_VOICE,
};
pub use events::{Envelope, EventSink, SessionEvent};
pub use manager::{Command, ConciergeHandle, VoiceSessionManager};
pub use playback::PlaybackPipeline;
pub use status::{ConnectionState, StatusSnapshot, UiStatus};
