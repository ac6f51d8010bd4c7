// Test doubles for the remote session and the audio devices
//
// The fake output runs on a manual clock so scheduling can be asserted
// exactly; the fake transport hands its event sink back to the test so
// server messages can be injected in any order.

#![allow(dead_code)]

use anyhow::Result;
use dinesa_concierge::audio::pcm;
use dinesa_concierge::{
    AudioDevices, AudioOutput, BufferId, CaptureConfig, CapturedBlock, ConciergeError,
    ConciergeResult, EventSink, LiveConnection, LiveTransport, MediaBlob, Microphone,
    OutputConfig, PlaybackBuffer, SessionConfig, SessionEvent, VoiceSessionManager,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

// ============================================================================
// Transport
// ============================================================================

#[derive(Default)]
pub struct FakeConnection {
    pub sent: Mutex<Vec<MediaBlob>>,
    pub closes: AtomicUsize,
    closed: AtomicBool,
}

impl FakeConnection {
    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl LiveConnection for FakeConnection {
    fn send_audio(&self, blob: MediaBlob) -> ConciergeResult<()> {
        if self.is_closed() {
            return Err(ConciergeError::SessionClosed);
        }
        self.sent.lock().unwrap().push(blob);
        Ok(())
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeTransport {
    pub connects: AtomicUsize,
    pub fail_connect: AtomicBool,
    /// Handshake never completes
    pub hang: AtomicBool,
    /// Handshake waits for `release`
    pub gated: AtomicBool,
    gate: Notify,
    sinks: Mutex<Vec<EventSink>>,
    connections: Mutex<Vec<Arc<FakeConnection>>>,
}

impl FakeTransport {
    /// Sink handed to the most recent connect
    pub fn sink(&self) -> EventSink {
        self.sinks
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no connect yet")
    }

    /// Inject a server event into the most recent session
    pub fn emit(&self, event: SessionEvent) -> bool {
        self.sink().send(event)
    }

    pub fn connection(&self) -> Arc<FakeConnection> {
        self.connections
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no connect yet")
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Let a gated handshake finish
    pub fn release(&self) {
        self.gate.notify_one();
    }
}

#[async_trait::async_trait]
impl LiveTransport for FakeTransport {
    async fn connect(
        &self,
        _config: &SessionConfig,
        events: EventSink,
    ) -> ConciergeResult<Arc<dyn LiveConnection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(ConciergeError::Connection("connection refused".to_string()));
        }

        // The remote side may start talking before the handshake returns
        let connection = Arc::new(FakeConnection::default());
        self.sinks.lock().unwrap().push(events);
        self.connections.lock().unwrap().push(Arc::clone(&connection));

        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        if self.gated.load(Ordering::SeqCst) {
            self.gate.notified().await;
        }

        Ok(connection)
    }
}

// ============================================================================
// Devices
// ============================================================================

/// State shared between the test and the devices handed to the manager
#[derive(Default)]
pub struct DeviceProbe {
    pub clock: Mutex<f64>,
    pub scheduled: Mutex<Vec<(BufferId, f64, f64)>>,
    pub stopped: Mutex<Vec<BufferId>>,
    pub output_opens: AtomicUsize,
    pub output_closes: AtomicUsize,
    pub mic_grants: AtomicUsize,
    pub mic_stops: AtomicUsize,
    pub mic_drops: AtomicUsize,
    pub mic_tx: Mutex<Option<mpsc::Sender<CapturedBlock>>>,
    pub output_sink: Mutex<Option<EventSink>>,
}

impl DeviceProbe {
    pub fn set_time(&self, t: f64) {
        *self.clock.lock().unwrap() = t;
    }

    pub fn scheduled(&self) -> Vec<(BufferId, f64, f64)> {
        self.scheduled.lock().unwrap().clone()
    }

    pub fn stopped(&self) -> Vec<BufferId> {
        self.stopped.lock().unwrap().clone()
    }

    /// Push one block through the fake microphone
    pub async fn capture(&self, block: CapturedBlock) -> bool {
        let tx = self.mic_tx.lock().unwrap().clone();
        match tx {
            Some(tx) => tx.send(block).await.is_ok(),
            None => false,
        }
    }

    /// Report a buffer as finished, the way a device callback would
    pub fn finish(&self, id: BufferId) -> bool {
        let sink = self.output_sink.lock().unwrap().clone();
        sink.map(|s| s.send(SessionEvent::PlaybackEnded(id)))
            .unwrap_or(false)
    }
}

pub struct FakeMicrophone {
    probe: Arc<DeviceProbe>,
    capturing: bool,
}

#[async_trait::async_trait]
impl Microphone for FakeMicrophone {
    async fn start(&mut self) -> Result<mpsc::Receiver<CapturedBlock>> {
        let (tx, rx) = mpsc::channel(32);
        *self.probe.mic_tx.lock().unwrap() = Some(tx);
        self.capturing = true;
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.capturing = false;
        self.probe.mic_tx.lock().unwrap().take();
        self.probe.mic_stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "fake microphone"
    }
}

impl Drop for FakeMicrophone {
    fn drop(&mut self) {
        self.probe.mic_drops.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct FakeOutput {
    probe: Arc<DeviceProbe>,
    closed: bool,
}

impl AudioOutput for FakeOutput {
    fn current_time(&self) -> f64 {
        *self.probe.clock.lock().unwrap()
    }

    fn schedule(
        &mut self,
        id: BufferId,
        buffer: PlaybackBuffer,
        start_at: f64,
    ) -> ConciergeResult<()> {
        if self.closed {
            return Err(ConciergeError::SessionClosed);
        }
        self.probe
            .scheduled
            .lock()
            .unwrap()
            .push((id, start_at, buffer.duration()));
        Ok(())
    }

    fn stop(&mut self, id: BufferId) {
        self.probe.stopped.lock().unwrap().push(id);
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.probe.output_closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn name(&self) -> &str {
        "fake output"
    }
}

pub struct FakeDevices {
    pub probe: Arc<DeviceProbe>,
    pub mic_allowed: AtomicBool,
}

impl FakeDevices {
    pub fn new() -> Self {
        Self {
            probe: Arc::new(DeviceProbe::default()),
            mic_allowed: AtomicBool::new(true),
        }
    }

    pub fn deny_microphone(&self) {
        self.mic_allowed.store(false, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl AudioDevices for FakeDevices {
    async fn request_microphone(
        &self,
        _config: &CaptureConfig,
    ) -> ConciergeResult<Box<dyn Microphone>> {
        if !self.mic_allowed.load(Ordering::SeqCst) {
            return Err(ConciergeError::PermissionDenied(
                "microphone access refused".to_string(),
            ));
        }

        self.probe.mic_grants.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeMicrophone {
            probe: Arc::clone(&self.probe),
            capturing: false,
        }))
    }

    async fn open_output(
        &self,
        _config: &OutputConfig,
        events: EventSink,
    ) -> ConciergeResult<Box<dyn AudioOutput>> {
        self.probe.output_opens.fetch_add(1, Ordering::SeqCst);
        *self.probe.output_sink.lock().unwrap() = Some(events);

        Ok(Box::new(FakeOutput {
            probe: Arc::clone(&self.probe),
            closed: false,
        }))
    }

    fn name(&self) -> &str {
        "fake"
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub struct Harness {
    pub manager: VoiceSessionManager,
    pub transport: Arc<FakeTransport>,
    pub devices: Arc<FakeDevices>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    pub fn with_config(config: SessionConfig) -> Self {
        let transport = Arc::new(FakeTransport::default());
        let devices = Arc::new(FakeDevices::new());
        let manager = VoiceSessionManager::new(
            config,
            Arc::clone(&transport) as Arc<dyn LiveTransport>,
            Arc::clone(&devices) as Arc<dyn AudioDevices>,
        );

        Self {
            manager,
            transport,
            devices,
        }
    }

    pub fn probe(&self) -> Arc<DeviceProbe> {
        Arc::clone(&self.devices.probe)
    }

    /// Apply the next connect result or event, failing if nothing arrives
    pub async fn settle(&mut self) {
        let handled = tokio::time::timeout(
            Duration::from_secs(1),
            self.manager.process_next_event(),
        )
        .await
        .expect("nothing arrived from the connect task");
        assert!(handled);
    }

    /// Start and apply the connect result
    pub async fn connect(&mut self) {
        self.manager.start().await;
        self.settle().await;
    }

    /// Start, connect and deliver the open event
    pub async fn open(&mut self) {
        self.connect().await;
        self.deliver(SessionEvent::Opened).await;
    }

    /// Deliver a server event and apply it
    pub async fn deliver(&mut self, event: SessionEvent) {
        self.transport.emit(event);
        self.manager.process_pending_events().await;
    }
}

/// Base64 chunk of `seconds` of 24kHz audio
pub fn chunk(seconds: f64) -> String {
    let samples = vec![0.25f32; (seconds * 24000.0).round() as usize];
    pcm::encode_blob(&samples, 24000).data
}

pub fn block(samples: usize, sample_rate: u32) -> CapturedBlock {
    CapturedBlock {
        samples: vec![0.5; samples],
        sample_rate,
        timestamp_ms: 0,
    }
}

/// Poll until `f` holds or a second passes
pub async fn wait_for(mut f: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if f() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    f()
}
