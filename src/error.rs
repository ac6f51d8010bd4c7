use thiserror::Error;

/// Failures the voice session state machine reacts to.
///
/// Everything else (config loading, WAV IO, the HTTP server) uses `anyhow`.
#[derive(Debug, Error)]
pub enum ConciergeError {
    /// The user or OS refused microphone access
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// No usable capture/output device
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The remote session could not be opened or failed after opening
    #[error("connection failed: {0}")]
    Connection(String),

    /// Corrupt base64 or PCM payload
    #[error("failed to decode audio chunk: {0}")]
    Decode(String),

    /// Tried to use a session that is already gone
    #[error("session closed")]
    SessionClosed,
}

pub type ConciergeResult<T> = std::result::Result<T, ConciergeError>;
