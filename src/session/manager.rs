//! Voice session state machine
//!
//! One task owns the live session: the remote connection, the capture
//! pipeline and the playback pipeline. UI commands and session events are
//! handled one at a time, so the schedule cursor and the active playback set
//! are never touched concurrently.
//!
//! The microphone request and the remote handshake run on a separate task
//! and report back through a channel, so `stop` is always answered even while
//! a connection attempt hangs.
//!
//! ```text
//! Idle ──start──> Connecting ──Opened──> Open(Listening) ──Closed/Errored/stop──> Idle
//!                     │                     ↺ chunk / interrupt / ended
//!                     └──mic denied / connect failed / Errored / stop──> Idle
//! ```

use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::capture::CapturePipeline;
use super::config::SessionConfig;
use super::events::{Envelope, EventSink, SessionEvent};
use super::playback::PlaybackPipeline;
use super::status::{ConnectionState, StatusSnapshot, UiStatus};
use crate::audio::{AudioDevices, Microphone};
use crate::error::ConciergeResult;
use crate::transport::{LiveConnection, LiveTransport};

/// Requests from the host UI
#[derive(Debug)]
pub enum Command {
    Toggle(oneshot::Sender<StatusSnapshot>),
    Start(oneshot::Sender<StatusSnapshot>),
    Stop(oneshot::Sender<StatusSnapshot>),
    Status(oneshot::Sender<StatusSnapshot>),
}

/// Result of the background connect for one session attempt
struct ConnectOutcome {
    generation: u64,
    session_id: String,
    result: ConciergeResult<(Arc<dyn LiveConnection>, Box<dyn Microphone>)>,
}

/// Resources owned by one session, released together on teardown
struct LiveSession {
    id: String,
    connection: Arc<dyn LiveConnection>,
    /// Held from permission grant until the session opens
    microphone: Option<Box<dyn Microphone>>,
    capture: Option<CapturePipeline>,
    playback: Option<PlaybackPipeline>,
}

/// Lifecycle controller for the voice concierge
pub struct VoiceSessionManager {
    config: SessionConfig,
    transport: Arc<dyn LiveTransport>,
    devices: Arc<dyn AudioDevices>,
    state: ConnectionState,
    /// Bumped on every start and teardown; events from older generations are stale
    generation: u64,
    /// Id of the attempt in flight, until teardown
    pending_id: Option<String>,
    /// The remote side opened before the connect task reported back
    open_pending: bool,
    session: Option<LiveSession>,
    status_tx: watch::Sender<StatusSnapshot>,
    events_tx: mpsc::UnboundedSender<Envelope>,
    events_rx: mpsc::UnboundedReceiver<Envelope>,
    connect_tx: mpsc::UnboundedSender<ConnectOutcome>,
    connect_rx: mpsc::UnboundedReceiver<ConnectOutcome>,
}

impl VoiceSessionManager {
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn LiveTransport>,
        devices: Arc<dyn AudioDevices>,
    ) -> Self {
        let (status_tx, _) = watch::channel(StatusSnapshot::idle());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (connect_tx, connect_rx) = mpsc::unbounded_channel();

        info!(
            "Voice concierge initialized (model {}, voice {}, devices {})",
            config.model,
            config.voice_name,
            devices.name()
        );

        Self {
            config,
            transport,
            devices,
            state: ConnectionState::Idle,
            generation: 0,
            pending_id: None,
            open_pending: false,
            session: None,
            status_tx,
            events_tx,
            events_rx,
            connect_tx,
            connect_rx,
        }
    }

    /// Begin opening a session unless one is active or connecting.
    ///
    /// Returns as soon as the state is `Connecting`; the outcome of the
    /// microphone request and the handshake arrives later as an event.
    pub async fn start(&mut self) {
        if self.state != ConnectionState::Idle {
            warn!("Voice session already {:?}, ignoring start", self.state);
            return;
        }

        self.generation += 1;
        self.open_pending = false;
        let generation = self.generation;
        let session_id = format!("concierge-{}", Uuid::new_v4());
        info!("Starting voice session {}", session_id);

        self.pending_id = Some(session_id.clone());
        self.transition(
            ConnectionState::Connecting,
            UiStatus::Connecting,
            Some(session_id.clone()),
        );

        let sink = EventSink::new(generation, session_id.clone(), self.events_tx.clone());
        let config = self.config.clone();
        let transport = Arc::clone(&self.transport);
        let devices = Arc::clone(&self.devices);
        let outcomes = self.connect_tx.clone();

        tokio::spawn(async move {
            let result = connect_session(&config, transport.as_ref(), devices.as_ref(), sink).await;
            let _ = outcomes.send(ConnectOutcome {
                generation,
                session_id,
                result,
            });
        });
    }

    /// Close the current session or abandon the attempt in flight. No-op when idle.
    pub async fn stop(&mut self) {
        if self.state == ConnectionState::Idle {
            debug!("No voice session to stop");
            return;
        }

        info!("Stopping voice session");
        self.teardown(UiStatus::Idle).await;
    }

    /// Start if idle, stop otherwise
    pub async fn toggle(&mut self) {
        match self.state {
            ConnectionState::Idle => self.start().await,
            _ => self.stop().await,
        }
    }

    /// Apply one session event
    pub async fn handle_event(&mut self, envelope: Envelope) {
        if envelope.generation != self.generation || self.state == ConnectionState::Idle {
            debug!(
                "Discarding stale {} event (generation {}, current {})",
                envelope.event.kind(),
                envelope.generation,
                self.generation
            );
            return;
        }

        if self.session.is_none() {
            self.handle_early_event(envelope.event).await;
            return;
        }

        match envelope.event {
            SessionEvent::Opened => self.on_open().await,
            SessionEvent::ChunkReceived(data) => self.on_chunk(&data),
            SessionEvent::Interrupted => self.on_interrupted(),
            SessionEvent::TurnComplete => debug!("Model turn complete"),
            SessionEvent::PlaybackEnded(id) => {
                if let Some(playback) = self.playback_mut() {
                    playback.ended(id);
                }
            }
            SessionEvent::Closed { reason } => {
                info!(
                    "Voice session closed by remote: {}",
                    reason.as_deref().unwrap_or("no reason given")
                );
                self.teardown(UiStatus::Disconnected).await;
            }
            SessionEvent::Errored(message) => {
                error!("Voice concierge error: {}", message);
                let status = if self.state == ConnectionState::Connecting {
                    UiStatus::Failed
                } else {
                    UiStatus::Disconnected
                };
                self.teardown(status).await;
            }
        }
    }

    /// Wait for the next connect result or session event and apply it
    pub async fn process_next_event(&mut self) -> bool {
        tokio::select! {
            Some(outcome) = self.connect_rx.recv() => {
                self.on_connected(outcome).await;
                true
            }
            Some(envelope) = self.events_rx.recv() => {
                self.handle_event(envelope).await;
                true
            }
            else => false,
        }
    }

    /// Apply every connect result and event already queued, without waiting
    pub async fn process_pending_events(&mut self) -> usize {
        let mut handled = 0;

        loop {
            if let Ok(outcome) = self.connect_rx.try_recv() {
                self.on_connected(outcome).await;
            } else if let Ok(envelope) = self.events_rx.try_recv() {
                self.handle_event(envelope).await;
            } else {
                break;
            }
            handled += 1;
        }

        handled
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn status(&self) -> StatusSnapshot {
        self.status_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.status_tx.subscribe()
    }

    /// Buffers currently scheduled or playing
    pub fn active_playback_count(&self) -> usize {
        self.playback().map(|p| p.active_count()).unwrap_or(0)
    }

    /// Schedule cursor of the open session
    pub fn next_start_time(&self) -> Option<f64> {
        self.playback().map(|p| p.next_start_time())
    }

    /// Output clock of the open session
    pub fn output_time(&self) -> Option<f64> {
        self.playback().map(|p| p.current_time())
    }

    /// Move the state machine onto its own task
    pub fn spawn(self) -> ConciergeHandle {
        let (commands_tx, commands_rx) = mpsc::channel(32);
        let status = self.subscribe();

        tokio::spawn(self.run(commands_rx));

        ConciergeHandle {
            commands: commands_tx,
            status,
        }
    }

    /// Handle commands, connect results and session events until every handle is dropped
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        info!("Voice concierge ready");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        info!("All concierge handles dropped, shutting down");
                        self.stop().await;
                        break;
                    }
                },
                Some(outcome) = self.connect_rx.recv() => self.on_connected(outcome).await,
                Some(envelope) = self.events_rx.recv() => self.handle_event(envelope).await,
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        let reply = match command {
            Command::Toggle(reply) => {
                self.toggle().await;
                reply
            }
            Command::Start(reply) => {
                self.start().await;
                reply
            }
            Command::Stop(reply) => {
                self.stop().await;
                reply
            }
            Command::Status(reply) => reply,
        };

        let _ = reply.send(self.status());
    }

    async fn on_connected(&mut self, outcome: ConnectOutcome) {
        let ConnectOutcome {
            generation,
            session_id,
            result,
        } = outcome;

        if generation != self.generation || self.state != ConnectionState::Connecting {
            debug!("Discarding connect result for abandoned session {}", session_id);
            if let Ok((connection, microphone)) = result {
                connection.close();
                release_microphone(microphone).await;
            }
            return;
        }

        match result {
            Ok((connection, microphone)) => {
                debug!("Session {} connected, waiting for setup", session_id);
                self.session = Some(LiveSession {
                    id: session_id,
                    connection,
                    microphone: Some(microphone),
                    capture: None,
                    playback: None,
                });

                if std::mem::take(&mut self.open_pending) {
                    self.on_open().await;
                }
            }
            Err(e) => {
                error!("Failed to start concierge: {}", e);
                self.teardown(UiStatus::Failed).await;
            }
        }
    }

    /// Events that raced ahead of the connect result
    async fn handle_early_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Opened => {
                debug!("Session opened before connect completed");
                self.open_pending = true;
            }
            SessionEvent::Closed { reason } => {
                info!(
                    "Voice session closed during handshake: {}",
                    reason.as_deref().unwrap_or("no reason given")
                );
                self.teardown(UiStatus::Failed).await;
            }
            SessionEvent::Errored(message) => {
                error!("Voice concierge error during handshake: {}", message);
                self.teardown(UiStatus::Failed).await;
            }
            other => debug!("Dropping {} event before connect completed", other.kind()),
        }
    }

    async fn on_open(&mut self) {
        if self.state != ConnectionState::Connecting {
            debug!("Session already open, ignoring duplicate open");
            return;
        }

        let wired = self.wire_session().await;

        match wired {
            Ok(session_id) => {
                info!("Voice session {} open, listening", session_id);
                self.transition(ConnectionState::Open, UiStatus::Listening, Some(session_id));
            }
            Err(e) => {
                error!("Failed to wire voice session: {:#}", e);
                self.teardown(UiStatus::Failed).await;
            }
        }
    }

    /// Acquire the output device and start streaming the microphone
    async fn wire_session(&mut self) -> Result<String> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| anyhow!("no session to wire"))?;

        let sink = EventSink::new(self.generation, session.id.clone(), self.events_tx.clone());
        let output = self
            .devices
            .open_output(&self.config.output, sink)
            .await
            .context("Failed to open output device")?;

        session.playback = Some(PlaybackPipeline::new(
            output,
            self.config.output.sample_rate,
            self.config.interrupt_reset,
        ));

        let microphone = session
            .microphone
            .take()
            .ok_or_else(|| anyhow!("microphone already consumed"))?;

        let capture = CapturePipeline::start(
            microphone,
            Arc::clone(&session.connection),
            self.config.capture.sample_rate,
        )
        .await?;

        session.capture = Some(capture);

        Ok(session.id.clone())
    }

    fn on_chunk(&mut self, data: &str) {
        let Some(playback) = self.playback_mut() else {
            debug!("Audio chunk before output is ready, dropping");
            return;
        };

        match playback.play_chunk(data) {
            Ok(Some(scheduled)) => debug!(
                "Chunk {} scheduled at {:.3}s for {:.3}s",
                scheduled.id, scheduled.start_at, scheduled.duration
            ),
            Ok(None) => debug!("Empty audio chunk ignored"),
            Err(e) => warn!("Dropping audio chunk: {}", e),
        }
    }

    fn on_interrupted(&mut self) {
        if let Some(playback) = self.playback_mut() {
            let stopped = playback.interrupt();
            info!("Barge-in: stopped {} buffers", stopped);
        }
    }

    /// Release every session resource and return to idle
    async fn teardown(&mut self, status: UiStatus) {
        self.generation += 1;
        self.open_pending = false;

        let mut session_id = self.pending_id.take();

        if let Some(mut session) = self.session.take() {
            if let Some(capture) = session.capture.take() {
                capture.stop().await;
            }

            if let Some(microphone) = session.microphone.take() {
                release_microphone(microphone).await;
            }

            if let Some(playback) = session.playback.take() {
                release_playback(playback).await;
            }

            session.connection.close();

            self.state = ConnectionState::Closed;
            info!("Voice session {} closed", session.id);
            session_id = Some(session.id);
        }

        self.transition(ConnectionState::Idle, status, session_id);
    }

    fn transition(&mut self, state: ConnectionState, status: UiStatus, session_id: Option<String>) {
        if self.state != state {
            debug!("Concierge state {:?} -> {:?}", self.state, state);
        }

        self.state = state;
        self.status_tx
            .send_replace(StatusSnapshot::new(status, state, session_id));
    }

    fn playback(&self) -> Option<&PlaybackPipeline> {
        self.session.as_ref().and_then(|s| s.playback.as_ref())
    }

    fn playback_mut(&mut self) -> Option<&mut PlaybackPipeline> {
        self.session.as_mut().and_then(|s| s.playback.as_mut())
    }
}

/// Microphone permission, then the remote handshake
async fn connect_session(
    config: &SessionConfig,
    transport: &dyn LiveTransport,
    devices: &dyn AudioDevices,
    events: EventSink,
) -> ConciergeResult<(Arc<dyn LiveConnection>, Box<dyn Microphone>)> {
    let microphone = devices.request_microphone(&config.capture).await?;
    info!("Microphone granted: {}", microphone.name());

    let connection = transport.connect(config, events).await?;

    Ok((connection, microphone))
}

// Device handles may join audio threads when released

async fn release_microphone(microphone: Box<dyn Microphone>) {
    if let Err(e) = tokio::task::spawn_blocking(move || drop(microphone)).await {
        error!("Microphone release panicked: {}", e);
    }
}

async fn release_playback(playback: PlaybackPipeline) {
    if let Err(e) = tokio::task::spawn_blocking(move || playback.shutdown()).await {
        error!("Playback release panicked: {}", e);
    }
}

/// Cloneable handle to a spawned concierge
#[derive(Clone)]
pub struct ConciergeHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<StatusSnapshot>,
}

impl ConciergeHandle {
    /// Start if idle, stop otherwise
    pub async fn toggle(&self) -> Result<StatusSnapshot> {
        self.request(Command::Toggle).await
    }

    pub async fn start(&self) -> Result<StatusSnapshot> {
        self.request(Command::Start).await
    }

    pub async fn stop(&self) -> Result<StatusSnapshot> {
        self.request(Command::Stop).await
    }

    /// Status after every previously sent command was handled
    pub async fn refresh(&self) -> Result<StatusSnapshot> {
        self.request(Command::Status).await
    }

    /// Latest published status
    pub fn status(&self) -> StatusSnapshot {
        self.status.borrow().clone()
    }

    /// Receive every status transition
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.clone()
    }

    async fn request(
        &self,
        command: impl FnOnce(oneshot::Sender<StatusSnapshot>) -> Command,
    ) -> Result<StatusSnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.commands
            .send(command(reply_tx))
            .await
            .map_err(|_| anyhow!("Concierge task is not running"))?;

        reply_rx
            .await
            .context("Concierge task dropped the request")
    }
}
