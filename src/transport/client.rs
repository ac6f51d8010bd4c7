use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::messages::{
    GenerationConfig, MediaBlob, PrebuiltVoiceConfig, RealtimeInputMessage, ServerMessage,
    SetupMessage, SetupPayload, SpeechConfig, SystemInstruction, TextPart, VoiceConfig,
};
use crate::error::{ConciergeError, ConciergeResult};
use crate::session::{EventSink, SessionConfig, SessionEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens bidirectional sessions with the remote conversational service
///
/// `connect` returns once the channel is established; the session is usable
/// after `SessionEvent::Opened` arrives on `events`. Every later inbound
/// message, close and error is reported on `events` too.
#[async_trait::async_trait]
pub trait LiveTransport: Send + Sync {
    async fn connect(
        &self,
        config: &SessionConfig,
        events: EventSink,
    ) -> ConciergeResult<Arc<dyn LiveConnection>>;
}

/// Handle to one open session
pub trait LiveConnection: Send + Sync {
    /// Queue one outbound audio frame. Never blocks.
    fn send_audio(&self, blob: MediaBlob) -> ConciergeResult<()>;

    /// Request close. Idempotent.
    fn close(&self);
}

/// Build the setup frame for a session
pub fn build_setup_message(config: &SessionConfig) -> SetupMessage {
    SetupMessage {
        setup: SetupPayload {
            model: format!("models/{}", config.model),
            generation_config: GenerationConfig {
                response_modalities: vec![config.response_modality.clone()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: config.voice_name.clone(),
                        },
                    },
                },
            },
            system_instruction: SystemInstruction {
                parts: vec![TextPart {
                    text: config.system_instruction.clone(),
                }],
            },
        },
    }
}

#[derive(Debug)]
enum Outbound {
    Audio(MediaBlob),
    Close,
}

/// Gemini Live over WebSocket
pub struct GeminiLiveClient;

impl GeminiLiveClient {
    pub fn new() -> Self {
        Self
    }

    async fn outbound_loop(
        mut rx: mpsc::UnboundedReceiver<Outbound>,
        mut sink: SplitSink<WsStream, WsMessage>,
        session_id: String,
    ) {
        let mut frames_sent: u64 = 0;

        while let Some(msg) = rx.recv().await {
            match msg {
                Outbound::Audio(blob) => {
                    let payload = match serde_json::to_string(&RealtimeInputMessage::audio(blob)) {
                        Ok(p) => p,
                        Err(e) => {
                            error!("Failed to serialize audio frame: {}", e);
                            continue;
                        }
                    };

                    if let Err(e) = sink.send(WsMessage::Text(payload)).await {
                        warn!("[{}] Failed to send audio frame: {}", session_id, e);
                        break;
                    }

                    frames_sent += 1;
                    if frames_sent % 100 == 0 {
                        debug!("[{}] Sent {} audio frames", session_id, frames_sent);
                    }
                }
                Outbound::Close => {
                    info!("[{}] Closing live session", session_id);
                    if let Err(e) = sink.send(WsMessage::Close(None)).await {
                        debug!("[{}] Close frame not sent: {}", session_id, e);
                    }
                    break;
                }
            }
        }

        let _ = sink.close().await;
        debug!("[{}] Outbound loop stopped ({} frames)", session_id, frames_sent);
    }

    async fn inbound_loop(mut stream: SplitStream<WsStream>, events: EventSink, session_id: String) {
        while let Some(frame) = stream.next().await {
            let text = match frame {
                Ok(WsMessage::Text(text)) => text,
                // The service also delivers JSON in binary frames
                Ok(WsMessage::Binary(data)) => match String::from_utf8(data) {
                    Ok(text) => text,
                    Err(_) => {
                        debug!("[{}] Ignoring non-UTF-8 binary frame", session_id);
                        continue;
                    }
                },
                Ok(WsMessage::Close(frame)) => {
                    let reason = frame.map(|f| f.reason.to_string()).filter(|r| !r.is_empty());
                    info!("[{}] Server closed session: {:?}", session_id, reason);
                    events.send(SessionEvent::Closed { reason });
                    return;
                }
                Ok(_) => continue,
                Err(e) => {
                    events.send(SessionEvent::Errored(e.to_string()));
                    return;
                }
            };

            match serde_json::from_str::<ServerMessage>(&text) {
                Ok(msg) => {
                    for event in msg.into_events() {
                        if !events.send(event) {
                            return;
                        }
                    }
                }
                Err(e) => {
                    debug!("[{}] Ignoring malformed server message: {}", session_id, e);
                }
            }
        }

        events.send(SessionEvent::Closed { reason: None });
    }
}

impl Default for GeminiLiveClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LiveTransport for GeminiLiveClient {
    async fn connect(
        &self,
        config: &SessionConfig,
        events: EventSink,
    ) -> ConciergeResult<Arc<dyn LiveConnection>> {
        let api_key = config
            .api_key
            .as_deref()
            .ok_or_else(|| ConciergeError::Connection("no API key configured".to_string()))?;

        let url = format!("{}?key={}", config.endpoint, api_key);
        info!("Connecting to live model {} at {}", config.model, config.endpoint);

        let (mut ws, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| ConciergeError::Connection(e.to_string()))?;

        let setup = serde_json::to_string(&build_setup_message(config))
            .map_err(|e| ConciergeError::Connection(e.to_string()))?;

        ws.send(WsMessage::Text(setup))
            .await
            .map_err(|e| ConciergeError::Connection(format!("failed to send setup: {}", e)))?;

        let (sink, stream) = ws.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let session_id = events.session_id().to_string();

        tokio::spawn(Self::outbound_loop(rx, sink, session_id.clone()));
        tokio::spawn(Self::inbound_loop(stream, events, session_id));

        Ok(Arc::new(GeminiConnection { outbound: tx }))
    }
}

struct GeminiConnection {
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl LiveConnection for GeminiConnection {
    fn send_audio(&self, blob: MediaBlob) -> ConciergeResult<()> {
        self.outbound
            .send(Outbound::Audio(blob))
            .map_err(|_| ConciergeError::SessionClosed)
    }

    fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }
}
