use serde::{Deserialize, Serialize};

use crate::session::SessionEvent;

/// Base64 audio tagged with its MIME descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaBlob {
    pub mime_type: String,
    pub data: String, // Base64-encoded PCM bytes
}

/// First frame sent on a new session
#[derive(Debug, Serialize)]
pub struct SetupMessage {
    pub setup: SetupPayload,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupPayload {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: SystemInstruction,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Serialize)]
pub struct SystemInstruction {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
pub struct TextPart {
    pub text: String,
}

/// One outbound microphone frame
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaBlob>,
}

impl RealtimeInputMessage {
    pub fn audio(blob: MediaBlob) -> Self {
        Self {
            realtime_input: RealtimeInput {
                media_chunks: vec![blob],
            },
        }
    }
}

/// Server envelope. Every field is optional; unknown fields are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<serde_json::Value>,
    pub server_content: Option<ServerContent>,
    pub error: Option<ServerError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    pub model_turn: Option<ModelTurn>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    pub inline_data: Option<InlineData>,
    pub text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub data: Option<String>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServerError {
    pub message: Option<String>,
}

impl ServerMessage {
    /// Translate the envelope into session events, in handling order.
    ///
    /// Audio parts come before the interruption flag so that an interrupt
    /// carried in the same message also cancels that message's audio.
    pub fn into_events(self) -> Vec<SessionEvent> {
        let mut events = Vec::new();

        if self.setup_complete.is_some() {
            events.push(SessionEvent::Opened);
        }

        if let Some(content) = self.server_content {
            let parts = content.model_turn.map(|turn| turn.parts).unwrap_or_default();
            for part in parts {
                let data = part.inline_data.and_then(|inline| inline.data);
                if let Some(data) = data.filter(|d| !d.is_empty()) {
                    events.push(SessionEvent::ChunkReceived(data));
                }
            }

            if content.interrupted {
                events.push(SessionEvent::Interrupted);
            }

            if content.turn_complete {
                events.push(SessionEvent::TurnComplete);
            }
        }

        if let Some(err) = self.error {
            events.push(SessionEvent::Errored(
                err.message
                    .unwrap_or_else(|| "Unknown server error".to_string()),
            ));
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_then_interrupt_order() {
        let json = r#"{
            "serverContent": {
                "modelTurn": { "parts": [{ "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AAA=" } }] },
                "interrupted": true
            }
        }"#;

        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        let events = msg.into_events();

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], SessionEvent::ChunkReceived(d) if d == "AAA="));
        assert!(matches!(events[1], SessionEvent::Interrupted));
    }

    #[test]
    fn test_empty_payload_ignored() {
        let json = r#"{ "serverContent": { "modelTurn": { "parts": [{ "inlineData": { "data": "" } }, { "text": "hi" }] } } }"#;

        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        assert!(msg.into_events().is_empty());
    }

    #[test]
    fn test_setup_complete() {
        let msg: ServerMessage = serde_json::from_str(r#"{ "setupComplete": {} }"#).unwrap();
        let events = msg.into_events();

        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], SessionEvent::Opened));
    }
}
