//! In-memory transport and audio devices for session tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use duplex_voice::{
    AudioBackend, AudioFormat, AudioFrame, AudioInput, AudioOutput, BoxedLink, ClientMessage,
    EndedSender, EntryId, EventHandler, FrameSink, Result, ServerEvent, SessionConfig,
    SessionState, ToolCall, ToolResponse, TranscriptSnapshot, Transport, TransportLink,
    VoiceError, audio,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;

// ── Transport ───────────────────────────────────────────────────────────

/// Link whose inbound side is driven by the test.
pub struct FakeLink {
    id: String,
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<Result<ServerEvent>>>>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<ServerEvent>>>,
    sent: Mutex<Vec<ClientMessage>>,
    closed: AtomicBool,
    closes: AtomicUsize,
    close_delay: Duration,
}

impl FakeLink {
    fn new(id: String, close_delay: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            id,
            inbound_tx: Mutex::new(Some(tx)),
            inbound_rx: tokio::sync::Mutex::new(rx),
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            closes: AtomicUsize::new(0),
            close_delay,
        }
    }

    /// Deliver an event from the "agent".
    pub fn push(&self, event: ServerEvent) {
        if let Some(tx) = self.inbound_tx.lock().as_ref() {
            let _ = tx.send(Ok(event));
        }
    }

    /// Deliver an inbound error.
    pub fn push_error(&self, error: VoiceError) {
        if let Some(tx) = self.inbound_tx.lock().as_ref() {
            let _ = tx.send(Err(error));
        }
    }

    /// The remote side goes away.
    pub fn hang_up(&self) {
        self.inbound_tx.lock().take();
    }

    pub fn sent(&self) -> Vec<ClientMessage> {
        self.sent.lock().clone()
    }

    pub fn tool_responses(&self) -> Vec<ToolResponse> {
        self.sent
            .lock()
            .iter()
            .filter_map(|m| match m {
                ClientMessage::ToolResponse(r) => Some(r.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn audio_sent(&self) -> usize {
        self.sent.lock().iter().filter(|m| matches!(m, ClientMessage::RealtimeAudio(_))).count()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportLink for FakeLink {
    fn link_id(&self) -> &str {
        &self.id
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    fn send(&self, message: ClientMessage) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        self.sent.lock().push(message);
        true
    }

    async fn next_event(&self) -> Option<Result<ServerEvent>> {
        self.inbound_rx.lock().await.recv().await
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        self.inbound_tx.lock().take();
        if !self.close_delay.is_zero() {
            tokio::time::sleep(self.close_delay).await;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct NetState {
    pub connects: AtomicUsize,
    pub refuse: AtomicBool,
    pub last_config: Mutex<Option<SessionConfig>>,
    /// How long each new link takes to close.
    pub close_delay: Mutex<Duration>,
    links: Mutex<Vec<Arc<FakeLink>>>,
}

/// Transport handing out [`FakeLink`]s.
#[derive(Clone, Default)]
pub struct FakeTransport {
    pub state: Arc<NetState>,
}

impl FakeTransport {
    pub fn refuse(&self, refuse: bool) {
        self.state.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn slow_close(&self, delay: Duration) {
        *self.state.close_delay.lock() = delay;
    }

    pub fn last_link(&self) -> Arc<FakeLink> {
        self.state.links.lock().last().cloned().expect("no link opened")
    }

    pub fn link_count(&self) -> usize {
        self.state.links.lock().len()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn provider(&self) -> &str {
        "fake"
    }

    async fn connect(&self, config: &SessionConfig) -> Result<BoxedLink> {
        let n = self.state.connects.fetch_add(1, Ordering::SeqCst);
        *self.state.last_config.lock() = Some(config.clone());
        if self.state.refuse.load(Ordering::SeqCst) {
            return Err(VoiceError::connection("connection refused"));
        }
        let link = Arc::new(FakeLink::new(format!("fake-{n}"), *self.state.close_delay.lock()));
        self.state.links.lock().push(link.clone());
        Ok(link)
    }
}

// ── Audio ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scheduled {
    pub id: EntryId,
    pub start: f64,
    pub duration: f64,
}

#[derive(Default)]
pub struct AudioState {
    pub clock: Mutex<f64>,
    pub deny_microphone: AtomicBool,
    pub input_closes: AtomicUsize,
    pub output_closes: AtomicUsize,
    pub inputs_opened: AtomicUsize,
    sink: Mutex<Option<FrameSink>>,
    ended: Mutex<Option<EndedSender>>,
    scheduled: Mutex<Vec<Scheduled>>,
    cancelled: Mutex<Vec<EntryId>>,
}

/// Audio backend with a hand-driven clock.
#[derive(Clone, Default)]
pub struct FakeAudio {
    pub state: Arc<AudioState>,
}

impl FakeAudio {
    pub fn set_time(&self, t: f64) {
        *self.state.clock.lock() = t;
    }

    /// Feed microphone samples as the device thread would.
    pub fn capture(&self, samples: &[f32]) {
        if let Some(sink) = self.state.sink.lock().as_mut() {
            sink(samples);
        }
    }

    /// Report an entry as played to the end.
    pub fn finish(&self, id: EntryId) {
        if let Some(ended) = self.state.ended.lock().as_ref() {
            let _ = ended.send(id);
        }
    }

    pub fn scheduled(&self) -> Vec<Scheduled> {
        self.state.scheduled.lock().clone()
    }

    pub fn cancelled(&self) -> Vec<EntryId> {
        self.state.cancelled.lock().clone()
    }

    pub fn input_closes(&self) -> usize {
        self.state.input_closes.load(Ordering::SeqCst)
    }

    pub fn output_closes(&self) -> usize {
        self.state.output_closes.load(Ordering::SeqCst)
    }

    pub fn inputs_opened(&self) -> usize {
        self.state.inputs_opened.load(Ordering::SeqCst)
    }
}

struct FakeInput(Arc<AudioState>);

impl AudioInput for FakeInput {
    fn close(&self) {
        self.0.input_closes.fetch_add(1, Ordering::SeqCst);
        self.0.sink.lock().take();
    }
}

struct FakeOutput(Arc<AudioState>);

impl AudioOutput for FakeOutput {
    fn current_time(&self) -> f64 {
        *self.0.clock.lock()
    }

    fn schedule(&self, id: EntryId, frame: &AudioFrame, start_at: f64) -> Result<()> {
        self.0.scheduled.lock().push(Scheduled { id, start: start_at, duration: frame.duration() });
        Ok(())
    }

    fn cancel(&self, id: EntryId) {
        self.0.cancelled.lock().push(id);
    }

    fn close(&self) {
        self.0.output_closes.fetch_add(1, Ordering::SeqCst);
        self.0.ended.lock().take();
    }
}

impl AudioBackend for FakeAudio {
    fn open_input(&self, _format: AudioFormat, sink: FrameSink) -> Result<Box<dyn AudioInput>> {
        if self.state.deny_microphone.load(Ordering::SeqCst) {
            return Err(VoiceError::device("microphone permission denied"));
        }
        self.state.inputs_opened.fetch_add(1, Ordering::SeqCst);
        *self.state.sink.lock() = Some(sink);
        Ok(Box::new(FakeInput(self.state.clone())))
    }

    fn open_output(
        &self,
        _format: AudioFormat,
        ended: EndedSender,
    ) -> Result<Box<dyn AudioOutput>> {
        *self.state.ended.lock() = Some(ended);
        Ok(Box::new(FakeOutput(self.state.clone())))
    }
}

// ── Handler ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    State(SessionState),
    Transcript(TranscriptSnapshot),
    Speaking(bool),
    Text(String),
    ToolCall(String),
    GoAway(Option<String>),
    Error(String),
}

/// Event handler that records everything it is told.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    pub events: Arc<Mutex<Vec<Recorded>>>,
}

impl RecordingHandler {
    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().clone()
    }

    pub fn transcripts(&self) -> Vec<TranscriptSnapshot> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Recorded::Transcript(t) => Some(t.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Recorded::Error(e) => Some(e.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn on_state(&self, state: &SessionState) {
        self.events.lock().push(Recorded::State(state.clone()));
    }

    async fn on_transcript(&self, snapshot: &TranscriptSnapshot) {
        self.events.lock().push(Recorded::Transcript(snapshot.clone()));
    }

    async fn on_speaking(&self, speaking: bool) {
        self.events.lock().push(Recorded::Speaking(speaking));
    }

    async fn on_text(&self, text: &str) {
        self.events.lock().push(Recorded::Text(text.to_string()));
    }

    async fn on_tool_call(&self, call: &ToolCall) {
        self.events.lock().push(Recorded::ToolCall(call.call_id.clone()));
    }

    async fn on_go_away(&self, time_left: Option<&str>) {
        self.events.lock().push(Recorded::GoAway(time_left.map(str::to_string)));
    }

    async fn on_error(&self, error: &VoiceError) {
        self.events.lock().push(Recorded::Error(error.to_string()));
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────

/// An agent audio event of `seconds` of silence at 24 kHz.
pub fn agent_audio(seconds: f64) -> ServerEvent {
    ServerEvent::Audio(audio::encode(&AudioFrame::silence(seconds, 24000)))
}

/// Poll `condition` until it holds, yielding to spawned tasks in between.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
