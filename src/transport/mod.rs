//! Remote conversational session transport (Gemini Live, WebSocket JSON)

pub mod client;
pub mod messages;

pub use client::{build_setup_message, GeminiLiveClient, LiveConnection, LiveTransport};
pub use messages::{MediaBlob, RealtimeInputMessage, ServerMessage, SetupMessage};
