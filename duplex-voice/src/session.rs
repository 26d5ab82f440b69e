//! The session controller.
//!
//! [`VoiceSession`] owns the state machine and wires capture, playback,
//! transcripts and tool calls to one transport link at a time.
//!
//! ```text
//!   Idle ──connect()──▶ Connecting ──ok──▶ Listening ◀──set_muted──▶ Active
//!                           │                  │                        │
//!                           └──fail──▶ Error ◀─┴──── link lost ─────────┘
//!
//!   any state ──disconnect()──▶ Closed
//! ```
//!
//! Teardown of a connection is a single sequence (clear the link slot, close
//! capture, stop playback, close the playback sink, abort tool calls, close the
//! link) run on explicit disconnect, on connection loss and on drop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use base64::Engine;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::audio;
use crate::capture::{CapturePipeline, CaptureStats, LinkSlot};
use crate::config::{SessionConfig, ToolDeclaration};
use crate::device::{AudioBackend, AudioInput, AudioOutput, EntryId};
use crate::error::{Result, VoiceError};
use crate::events::{ClientMessage, ServerEvent, ToolCall};
use crate::handler::{EventHandler, NoOpEventHandler};
use crate::playback::PlaybackScheduler;
use crate::tools::{AsyncToolHandler, FnToolHandler, ToolBroker, ToolHandler, ToolRegistry};
use crate::transcript::{TranscriptAggregator, TranscriptSide, TranscriptSnapshot};
use crate::transport::{BoxedLink, BoxedTransport};

/// Lifecycle state of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Built but never connected.
    Idle,
    /// Opening devices and negotiating with the agent.
    Connecting,
    /// Connected with the microphone muted.
    Listening,
    /// Connected with the microphone live.
    Active,
    /// The last connection failed; `connect()` again to recover.
    Error(String),
    /// Disconnected by the caller.
    Closed,
}

impl SessionState {
    /// Whether a connection is being set up or is live.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Connecting | Self::Listening | Self::Active)
    }

    /// Whether the session is connected (muted or not).
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Listening | Self::Active)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Listening => write!(f, "listening"),
            Self::Active => write!(f, "active"),
            Self::Error(cause) => write!(f, "error: {cause}"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Handler notifications, delivered in order by a forwarder task so that a slow
/// handler never holds up audio.
enum Notification {
    State(SessionState),
    Transcript(TranscriptSnapshot),
    Text(String),
    ToolCall(ToolCall),
    GoAway(Option<String>),
    Error(VoiceError),
}

/// Resources owned by one live connection.
struct Live {
    generation: u64,
    link: BoxedLink,
    input: Box<dyn AudioInput>,
    output: Arc<dyn AudioOutput>,
    scheduler: Arc<PlaybackScheduler>,
    capture: Arc<CapturePipeline>,
    broker: Arc<ToolBroker>,
    pump: Option<JoinHandle<()>>,
}

impl Live {
    /// Release everything except the link, without waiting.
    fn release_local(&mut self, slot: &LinkSlot) {
        *slot.write() = None;
        self.input.close();
        self.scheduler.stop();
        self.output.close();
        let aborted = self.broker.abort_all();
        if aborted > 0 {
            tracing::debug!(aborted, "Aborted outstanding tool calls");
        }
    }

    /// Full teardown. The pump is aborted unless it was detached by the caller.
    async fn shutdown(mut self, slot: &LinkSlot) {
        self.release_local(slot);
        if let Err(e) = self.link.close().await {
            tracing::warn!(error = %e, "Error closing transport link");
        }
        if let Some(pump) = self.pump.take() {
            pump.abort();
            let _ = pump.await;
        }
    }

    /// Teardown usable from `Drop`: the link is closed on a detached task.
    fn shutdown_detached(mut self, slot: &LinkSlot) {
        self.release_local(slot);
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let link = self.link.clone();
            runtime.spawn(async move {
                let _ = link.close().await;
            });
        }
    }
}

struct Inner {
    id: String,
    config: SessionConfig,
    transport: BoxedTransport,
    backend: Arc<dyn AudioBackend>,
    tools: Arc<ToolRegistry>,
    handler: Arc<dyn EventHandler>,
    state: watch::Sender<SessionState>,
    speaking: Arc<watch::Sender<bool>>,
    muted: Arc<AtomicBool>,
    link_slot: Arc<LinkSlot>,
    live: Mutex<Option<Live>>,
    generation: AtomicU64,
    lifecycle: tokio::sync::Mutex<()>,
    notify_tx: mpsc::UnboundedSender<Notification>,
    notify_rx: Mutex<Option<mpsc::UnboundedReceiver<Notification>>>,
}

impl Inner {
    fn set_state(&self, state: SessionState) {
        tracing::info!(session_id = %self.id, state = %state, "Session state changed");
        self.state.send_replace(state.clone());
        self.notify(Notification::State(state));
    }

    fn notify(&self, notification: Notification) {
        let _ = self.notify_tx.send(notification);
    }

    fn fail(&self, error: VoiceError) -> VoiceError {
        tracing::error!(session_id = %self.id, error = %error, "Session failed");
        self.muted.store(true, Ordering::Release);
        self.set_state(SessionState::Error(error.to_string()));
        self.notify(Notification::Error(error.replicate()));
        error
    }

    /// Tear down connection `generation` after its link failed underneath us.
    ///
    /// Holds the lifecycle lock for the whole teardown so a concurrent
    /// `disconnect()` or `connect()` only runs once the failure is published.
    async fn fail_live(&self, generation: u64, error: VoiceError) {
        let _lifecycle = self.lifecycle.lock().await;
        let live = {
            let mut slot = self.live.lock();
            // None if already torn down or replaced by a newer connection.
            let current = slot.as_ref().is_some_and(|live| live.generation == generation);
            if current { slot.take() } else { None }
        };
        let Some(mut live) = live else {
            tracing::debug!(session_id = %self.id, generation, "Stale link failure ignored");
            return;
        };
        // Detach: we are running on the pump.
        live.pump.take();
        live.shutdown(&self.link_slot).await;
        self.fail(error);
    }

    fn handle_event(
        &self,
        event: ServerEvent,
        transcript: &mut TranscriptAggregator,
        scheduler: &PlaybackScheduler,
        broker: &ToolBroker,
    ) {
        match event {
            ServerEvent::SetupComplete => {
                tracing::debug!(session_id = %self.id, "Setup acknowledged");
            }
            ServerEvent::InputTranscription(text) => {
                let snapshot = transcript.push(TranscriptSide::Input, &text);
                self.notify(Notification::Transcript(snapshot));
            }
            ServerEvent::OutputTranscription(text) => {
                let snapshot = transcript.push(TranscriptSide::Output, &text);
                self.notify(Notification::Transcript(snapshot));
            }
            ServerEvent::ModelText(text) => {
                self.notify(Notification::Text(text));
            }
            ServerEvent::Audio(chunk) => match audio::decode(&chunk) {
                Ok(frame) => {
                    if let Err(e) = scheduler.schedule(&frame) {
                        tracing::warn!(error = %e, "Playback device rejected fragment");
                        self.notify(Notification::Error(e));
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        bytes = chunk.data.len(),
                        "Dropping malformed audio fragment"
                    );
                    self.notify(Notification::Error(e));
                }
            },
            ServerEvent::TurnComplete => {
                let snapshot = transcript.complete_turn();
                self.notify(Notification::Transcript(snapshot));
            }
            ServerEvent::Interrupted => {
                let cancelled = scheduler.stop();
                tracing::info!(session_id = %self.id, cancelled, "Agent interrupted by user");
            }
            ServerEvent::ToolCall(calls) => {
                for call in &calls {
                    tracing::info!(
                        call_id = %call.call_id,
                        tool = %call.name,
                        "Tool call requested"
                    );
                    self.notify(Notification::ToolCall(call.clone()));
                }
                broker.dispatch(calls);
            }
            ServerEvent::ToolCallCancelled(ids) => {
                broker.cancel(&ids);
            }
            ServerEvent::GoAway { time_left } => {
                tracing::warn!(
                    session_id = %self.id,
                    time_left = ?time_left,
                    "Server is going away"
                );
                self.notify(Notification::GoAway(time_left));
            }
        }
    }
}

async fn run_pump(
    inner: Arc<Inner>,
    generation: u64,
    link: BoxedLink,
    scheduler: Arc<PlaybackScheduler>,
    broker: Arc<ToolBroker>,
    mut ended_rx: mpsc::UnboundedReceiver<EntryId>,
) {
    let mut transcript = TranscriptAggregator::new();

    let failure = loop {
        tokio::select! {
            biased;
            Some(id) = ended_rx.recv() => {
                scheduler.on_ended(id);
            }
            event = link.next_event() => match event {
                Some(Ok(event)) => inner.handle_event(event, &mut transcript, &scheduler, &broker),
                Some(Err(e)) if e.is_fatal() => break e,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Ignoring bad inbound message");
                    inner.notify(Notification::Error(e));
                }
                None => break VoiceError::connection("connection closed by remote"),
            }
        }
    };

    inner.fail_live(generation, failure).await;
}

async fn forward_notifications(
    handler: Arc<dyn EventHandler>,
    mut notifications: mpsc::UnboundedReceiver<Notification>,
    mut speaking: watch::Receiver<bool>,
) {
    let mut speaking_open = true;
    loop {
        tokio::select! {
            notification = notifications.recv() => {
                let Some(notification) = notification else { break };
                match notification {
                    Notification::State(state) => handler.on_state(&state).await,
                    Notification::Transcript(snapshot) => handler.on_transcript(&snapshot).await,
                    Notification::Text(text) => handler.on_text(&text).await,
                    Notification::ToolCall(call) => handler.on_tool_call(&call).await,
                    Notification::GoAway(time_left) => {
                        handler.on_go_away(time_left.as_deref()).await
                    }
                    Notification::Error(error) => handler.on_error(&error).await,
                }
            }
            changed = speaking.changed(), if speaking_open => match changed {
                Ok(()) => {
                    let now = *speaking.borrow_and_update();
                    handler.on_speaking(now).await;
                }
                Err(_) => speaking_open = false,
            }
        }
    }
}

/// Builder for [`VoiceSession`].
pub struct VoiceSessionBuilder {
    transport: Option<BoxedTransport>,
    backend: Option<Arc<dyn AudioBackend>>,
    config: SessionConfig,
    tools: ToolRegistry,
    handler: Option<Arc<dyn EventHandler>>,
}

impl Default for VoiceSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl VoiceSessionBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            transport: None,
            backend: None,
            config: SessionConfig::default(),
            tools: ToolRegistry::new(),
            handler: None,
        }
    }

    /// Set the transport used to reach the agent.
    pub fn transport(mut self, transport: BoxedTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set the audio backend.
    pub fn audio(mut self, backend: Arc<dyn AudioBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set the session configuration.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the system instruction.
    pub fn instruction(mut self, instruction: impl Into<String>) -> Self {
        self.config.instruction = Some(instruction.into());
        self
    }

    /// Set the voice.
    pub fn voice(mut self, voice: impl Into<String>) -> Self {
        self.config.voice = Some(voice.into());
        self
    }

    /// Register a tool with its handler.
    pub fn tool(
        mut self,
        declaration: ToolDeclaration,
        handler: impl ToolHandler + 'static,
    ) -> Self {
        self.tools.register(declaration, Arc::new(handler));
        self
    }

    /// Register a tool with a sync function handler.
    pub fn tool_fn<F>(self, declaration: ToolDeclaration, handler: F) -> Self
    where
        F: Fn(&ToolCall) -> Result<Value> + Send + Sync + 'static,
    {
        self.tool(declaration, FnToolHandler::new(handler))
    }

    /// Register a tool with an async function handler.
    pub fn tool_async<F, Fut>(self, declaration: ToolDeclaration, handler: F) -> Self
    where
        F: Fn(ToolCall) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
    {
        self.tool(declaration, AsyncToolHandler::new(handler))
    }

    /// Set the event handler.
    pub fn event_handler(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Build the session (does not connect yet).
    pub fn build(self) -> Result<VoiceSession> {
        let transport = self.transport.ok_or_else(|| VoiceError::config("Transport is required"))?;
        let backend = self.backend.ok_or_else(|| VoiceError::config("Audio backend is required"))?;

        // Registered tools are declared to the agent alongside any configured ones.
        let mut config = self.config;
        for decl in self.tools.declarations() {
            if !config.tools.iter().any(|t| t.name == decl.name) {
                config.tools.push(decl);
            }
        }
        config.validate()?;

        let (state, _) = watch::channel(SessionState::Idle);
        let (speaking, _) = watch::channel(false);
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();

        Ok(VoiceSession {
            inner: Arc::new(Inner {
                id: uuid::Uuid::new_v4().to_string(),
                config,
                transport,
                backend,
                tools: Arc::new(self.tools),
                handler: self.handler.unwrap_or_else(|| Arc::new(NoOpEventHandler)),
                state,
                speaking: Arc::new(speaking),
                muted: Arc::new(AtomicBool::new(true)),
                link_slot: Arc::new(RwLock::new(None)),
                live: Mutex::new(None),
                generation: AtomicU64::new(0),
                lifecycle: tokio::sync::Mutex::new(()),
                notify_tx,
                notify_rx: Mutex::new(Some(notify_rx)),
            }),
        })
    }
}

/// A real-time duplex voice session with a remote agent.
///
/// # Example
///
/// ```rust,ignore
/// use duplex_voice::{ToolDeclaration, VoiceSession};
/// use duplex_voice::gemini::{GeminiLiveBackend, GeminiLiveTransport};
///
/// let transport = GeminiLiveTransport::new(GeminiLiveBackend::from_env()?);
/// let session = VoiceSession::builder()
///     .transport(Arc::new(transport))
///     .audio(Arc::new(my_audio_backend))
///     .instruction("You are a friendly art tutor.")
///     .tool_async(ToolDeclaration::new("draw_scene"), |call| async move {
///         Ok(serde_json::json!({"status": "drawn"}))
///     })
///     .build()?;
///
/// session.connect().await?;   // Listening (muted)
/// session.set_muted(false)?;  // Active
/// // ...
/// session.disconnect().await?;
/// ```
pub struct VoiceSession {
    inner: Arc<Inner>,
}

impl VoiceSession {
    /// Create a new builder.
    pub fn builder() -> VoiceSessionBuilder {
        VoiceSessionBuilder::new()
    }

    /// Session identifier.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Effective configuration, including registered tool declarations.
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Whether the agent's audio is scheduled or playing.
    pub fn is_speaking(&self) -> bool {
        *self.inner.speaking.borrow()
    }

    /// Watch the speaking flag.
    pub fn subscribe_speaking(&self) -> watch::Receiver<bool> {
        self.inner.speaking.subscribe()
    }

    /// Whether the microphone is muted.
    pub fn is_muted(&self) -> bool {
        self.inner.muted.load(Ordering::Acquire)
    }

    /// Playback cursor of the live connection.
    pub fn next_playback_time(&self) -> Option<f64> {
        self.inner.live.lock().as_ref().map(|live| live.scheduler.next_playback_time())
    }

    /// Number of scheduled playback entries.
    pub fn active_playback(&self) -> usize {
        self.inner.live.lock().as_ref().map_or(0, |live| live.scheduler.active_count())
    }

    /// Capture batch counters of the live connection.
    pub fn capture_stats(&self) -> Option<CaptureStats> {
        self.inner.live.lock().as_ref().map(|live| live.capture.stats())
    }

    /// Number of tool calls still running.
    pub fn pending_tool_calls(&self) -> usize {
        self.inner.live.lock().as_ref().map_or(0, |live| live.broker.pending())
    }

    /// Open devices, connect to the agent and start the inbound pump.
    ///
    /// Allowed from `Idle`, `Error` and `Closed`. On success the session is
    /// `Listening` with the microphone muted. On failure it is `Error` and
    /// every resource opened so far has been released.
    pub async fn connect(&self) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        if self.state().is_live() {
            return Err(VoiceError::AlreadyConnected);
        }

        let stale = self.inner.live.lock().take();
        if let Some(stale) = stale {
            tracing::warn!(session_id = %self.inner.id, "Releasing stale connection");
            stale.shutdown(&self.inner.link_slot).await;
        }

        self.spawn_forwarder();
        self.inner.muted.store(true, Ordering::Release);
        self.inner.set_state(SessionState::Connecting);

        let inner = &self.inner;
        let config = &inner.config;
        tracing::info!(
            session_id = %inner.id,
            provider = inner.transport.provider(),
            tools = config.tools.len(),
            "Connecting"
        );

        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        let output: Arc<dyn AudioOutput> =
            match inner.backend.open_output(config.output_audio_format, ended_tx) {
                Ok(output) => Arc::from(output),
                Err(e) => return Err(inner.fail(e)),
            };

        let link = match inner.transport.connect(config).await {
            Ok(link) => link,
            Err(e) => {
                output.close();
                return Err(inner.fail(e));
            }
        };
        *inner.link_slot.write() = Some(link.clone());

        let capture = Arc::new(CapturePipeline::new(
            config.input_audio_format.sample_rate,
            config.capture_batch_samples,
            inner.muted.clone(),
            inner.link_slot.clone(),
        ));
        let sink = capture.clone().into_sink();
        let input = match inner.backend.open_input(config.input_audio_format, sink) {
            Ok(input) => input,
            Err(e) => {
                *inner.link_slot.write() = None;
                output.close();
                if let Err(close_err) = link.close().await {
                    tracing::warn!(error = %close_err, "Error closing transport link");
                }
                return Err(inner.fail(e));
            }
        };

        let scheduler = Arc::new(PlaybackScheduler::new(output.clone(), inner.speaking.clone()));
        let broker = Arc::new(ToolBroker::new(
            inner.tools.clone(),
            link.clone(),
            config.max_concurrent_tools,
        ));

        let generation = inner.generation.fetch_add(1, Ordering::Relaxed) + 1;

        // State is published before the pump can observe a failure.
        let mut live = inner.live.lock();
        inner.set_state(SessionState::Listening);
        let pump = tokio::spawn(run_pump(
            inner.clone(),
            generation,
            link.clone(),
            scheduler.clone(),
            broker.clone(),
            ended_rx,
        ));
        *live = Some(Live {
            generation,
            link,
            input,
            output,
            scheduler,
            capture,
            broker,
            pump: Some(pump),
        });
        drop(live);

        tracing::info!(session_id = %inner.id, generation, "Connected");
        Ok(())
    }

    /// Mute or unmute the microphone.
    ///
    /// Muting discards any partial capture batch and stops agent playback
    /// immediately.
    pub fn set_muted(&self, muted: bool) -> Result<()> {
        let live = self.inner.live.lock();
        let Some(live) = live.as_ref() else {
            return Err(VoiceError::NotConnected);
        };

        self.inner.muted.store(muted, Ordering::Release);
        if muted {
            live.capture.reset();
            live.scheduler.stop();
            self.inner.set_state(SessionState::Listening);
        } else {
            self.inner.set_state(SessionState::Active);
        }
        Ok(())
    }

    /// Flip the mute flag. Returns the new value.
    pub fn toggle_mute(&self) -> Result<bool> {
        let muted = !self.is_muted();
        self.set_muted(muted)?;
        Ok(muted)
    }

    /// Stop agent playback without muting.
    pub fn stop_playback(&self) -> Result<usize> {
        let live = self.inner.live.lock();
        let live = live.as_ref().ok_or(VoiceError::NotConnected)?;
        Ok(live.scheduler.stop())
    }

    /// Send a complete user text turn.
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(ClientMessage::Text { text: text.into(), turn_complete: true })
    }

    /// Submit an image, optionally followed by a caption turn.
    pub fn send_image(&self, bytes: &[u8], mime_type: &str, caption: Option<&str>) -> Result<()> {
        if !mime_type.starts_with("image/") {
            return Err(VoiceError::config(format!("not an image type: {mime_type}")));
        }
        let data = base64::engine::general_purpose::STANDARD.encode(bytes);
        self.send(ClientMessage::Image { mime_type: mime_type.to_string(), data })?;
        if let Some(caption) = caption {
            self.send_text(caption)?;
        }
        Ok(())
    }

    fn send(&self, message: ClientMessage) -> Result<()> {
        let live = self.inner.live.lock();
        let live = live.as_ref().ok_or(VoiceError::NotConnected)?;
        let kind = message.kind();
        if !live.link.send(message) {
            return Err(VoiceError::NotConnected);
        }
        tracing::debug!(session_id = %self.inner.id, kind, "Queued client message");
        Ok(())
    }

    /// Tear the connection down. Safe to call any number of times.
    pub async fn disconnect(&self) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.inner.muted.store(true, Ordering::Release);

        let live = self.inner.live.lock().take();
        match live {
            Some(live) => {
                tracing::info!(session_id = %self.inner.id, "Disconnecting");
                live.shutdown(&self.inner.link_slot).await;
                self.inner.set_state(SessionState::Closed);
            }
            None if self.state() != SessionState::Closed => {
                self.inner.set_state(SessionState::Closed);
            }
            None => {}
        }
        Ok(())
    }

    fn spawn_forwarder(&self) {
        if let Some(rx) = self.inner.notify_rx.lock().take() {
            tokio::spawn(forward_notifications(
                self.inner.handler.clone(),
                rx,
                self.inner.speaking.subscribe(),
            ));
        }
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        let live = self.inner.live.lock().take();
        if let Some(live) = live {
            live.shutdown_detached(&self.inner.link_slot);
            self.inner.set_state(SessionState::Closed);
        }
    }
}

impl std::fmt::Debug for VoiceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceSession")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("muted", &self.is_muted())
            .finish()
    }
}
