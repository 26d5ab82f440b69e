//! Text-driven Gemini Live session with a headless audio backend.
//!
//! ```sh
//! GOOGLE_API_KEY=... RUST_LOG=duplex_voice=info cargo run --example live_session -- "Describe a sunset"
//! ```
//!
//! The backend keeps a wall clock and reports playback entries as finished
//! when their window elapses, so the speaking flag behaves as it would with a
//! real speaker.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use duplex_voice::gemini::{GeminiLiveBackend, GeminiLiveTransport};
use duplex_voice::{
    AudioBackend, AudioFormat, AudioFrame, AudioInput, AudioOutput, EndedSender, EntryId,
    EventHandler, FrameSink, SessionState, ToolCall, ToolDeclaration, TranscriptSnapshot,
    VoiceError, VoiceSession,
};
use serde_json::json;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

struct HeadlessAudio;

struct NoMicrophone;

impl AudioInput for NoMicrophone {
    fn close(&self) {}
}

struct WallClockSpeaker {
    started: Instant,
    ended: EndedSender,
}

impl AudioOutput for WallClockSpeaker {
    fn current_time(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    fn schedule(&self, id: EntryId, frame: &AudioFrame, start_at: f64) -> duplex_voice::Result<()> {
        let end = start_at + frame.duration();
        let wait = Duration::from_secs_f64((end - self.current_time()).max(0.0));
        let ended = self.ended.clone();
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            let _ = ended.send(id);
        });
        Ok(())
    }

    fn cancel(&self, _id: EntryId) {}

    fn close(&self) {}
}

impl AudioBackend for HeadlessAudio {
    fn open_input(
        &self,
        _format: AudioFormat,
        _sink: FrameSink,
    ) -> duplex_voice::Result<Box<dyn AudioInput>> {
        Ok(Box::new(NoMicrophone))
    }

    fn open_output(
        &self,
        _format: AudioFormat,
        ended: EndedSender,
    ) -> duplex_voice::Result<Box<dyn AudioOutput>> {
        Ok(Box::new(WallClockSpeaker { started: Instant::now(), ended }))
    }
}

struct Console {
    turn_done: Arc<Notify>,
}

#[async_trait]
impl EventHandler for Console {
    async fn on_state(&self, state: &SessionState) {
        println!("[state] {state}");
    }

    async fn on_transcript(&self, snapshot: &TranscriptSnapshot) {
        if snapshot.is_final {
            println!("you:   {}", snapshot.input);
            println!("agent: {}", snapshot.output);
            self.turn_done.notify_one();
        }
    }

    async fn on_speaking(&self, speaking: bool) {
        println!("[speaking] {speaking}");
    }

    async fn on_tool_call(&self, call: &ToolCall) {
        println!("[tool] {} {}", call.name, call.arguments);
    }

    async fn on_error(&self, error: &VoiceError) {
        eprintln!("[error] {error}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let prompt =
        std::env::args().nth(1).unwrap_or_else(|| "Say hello in one sentence.".to_string());
    let turn_done = Arc::new(Notify::new());

    let session = VoiceSession::builder()
        .transport(Arc::new(GeminiLiveTransport::new(GeminiLiveBackend::from_env()?)))
        .audio(Arc::new(HeadlessAudio))
        .instruction("You are a concise assistant. Call get_time when asked about the time.")
        .voice("Puck")
        .tool_fn(
            ToolDeclaration::new("get_time")
                .with_description("Current UTC time as seconds since epoch"),
            |_call: &ToolCall| {
                let secs = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or_default();
                Ok(json!({ "epoch_seconds": secs }))
            },
        )
        .event_handler(Console { turn_done: turn_done.clone() })
        .build()?;

    session.connect().await?;
    session.send_text(prompt)?;

    if tokio::time::timeout(Duration::from_secs(60), turn_done.notified()).await.is_err() {
        eprintln!("No complete turn within 60s");
    }

    session.disconnect().await?;
    Ok(())
}
