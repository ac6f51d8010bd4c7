use tokio::sync::mpsc;
use tracing::trace;

use crate::audio::BufferId;

/// Everything that can happen to a live session, delivered to one handler
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Remote setup finished; the session accepts audio
    Opened,
    /// Base64 PCM chunk from the model
    ChunkReceived(String),
    /// The model detected barge-in; discard pending output
    Interrupted,
    /// The model finished its turn
    TurnComplete,
    /// The remote side closed the session
    Closed { reason: Option<String> },
    /// Transport failure
    Errored(String),
    /// An output buffer finished playing
    PlaybackEnded(BufferId),
}

impl SessionEvent {
    /// Short name for logs (chunk payloads are too large to print)
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::Opened => "opened",
            SessionEvent::ChunkReceived(_) => "chunk",
            SessionEvent::Interrupted => "interrupted",
            SessionEvent::TurnComplete => "turn-complete",
            SessionEvent::Closed { .. } => "closed",
            SessionEvent::Errored(_) => "errored",
            SessionEvent::PlaybackEnded(_) => "playback-ended",
        }
    }
}

/// A session event stamped with the session generation it belongs to
#[derive(Debug, Clone)]
pub struct Envelope {
    pub generation: u64,
    pub event: SessionEvent,
}

/// Where transports and devices report events for one session
///
/// Events sent after the session was torn down still arrive, but carry a
/// stale generation and are discarded by the state machine.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    session_id: String,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl EventSink {
    pub fn new(generation: u64, session_id: String, tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self {
            generation,
            session_id,
            tx,
        }
    }

    /// Sink with its own receiver, for driving devices outside a session
    pub fn detached(session_id: &str) -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(0, session_id.to_string(), tx), rx)
    }

    /// Report an event. Returns false once the state machine is gone.
    pub fn send(&self, event: SessionEvent) -> bool {
        trace!("[{}] {} event", self.session_id, event.kind());
        self.tx
            .send(Envelope {
                generation: self.generation,
                event,
            })
            .is_ok()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}
