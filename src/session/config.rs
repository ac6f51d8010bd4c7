use crate::audio::{CaptureConfig, InterruptReset, OutputConfig};

/// Live model used for the voice concierge
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Gemini Live bidirectional streaming endpoint
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Prebuilt voice for synthesized replies
pub const DEFAULT_VOICE: &str = "Zephyr";

/// Concierge persona sent as the system instruction
pub const DEFAULT_PERSONA: &str = "You are the DineSA Platinum Concierge. You speak in a friendly, helpful, and sophisticated South African accent (think elegant and warm). Help users find restaurants, explain food culture, or discuss deals in South Africa. Keep responses concise as this is a voice interaction.";

/// Configuration for a voice session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Model id, without the `models/` prefix
    pub model: String,

    /// Prebuilt voice name
    pub voice_name: String,

    /// Persona instruction sent at setup
    pub system_instruction: String,

    /// Response modality requested from the model (always audio)
    pub response_modality: String,

    /// WebSocket endpoint
    pub endpoint: String,

    /// API key appended to the endpoint URL
    pub api_key: Option<String>,

    /// Microphone framing
    pub capture: CaptureConfig,

    /// Output device clock
    pub output: OutputConfig,

    /// Schedule cursor reset on barge-in
    pub interrupt_reset: InterruptReset,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            voice_name: DEFAULT_VOICE.to_string(),
            system_instruction: DEFAULT_PERSONA.to_string(),
            response_modality: "AUDIO".to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            capture: CaptureConfig::default(),   // 16kHz mono, 4096-sample blocks
            output: OutputConfig::default(),     // 24kHz mono
            interrupt_reset: InterruptReset::default(),
        }
    }
}
