//! # duplex-voice
//!
//! Real-time, full-duplex voice sessions with a remote conversational agent.
//!
//! A [`VoiceSession`] streams microphone audio up to the agent and plays the
//! agent's audio back gaplessly, while transcripts and tool calls flow over the
//! same connection.
//!
//! ## Architecture
//!
//! ```text
//!   mic ─▶ AudioInput ─▶ CapturePipeline ──encode──▶ ┐
//!                          (muted? drop)             │
//!                                                    ▼
//!                                              TransportLink ◀──▶ remote agent
//!                                                    │
//!        ┌────────────── inbound pump ◀──────────────┘
//!        │
//!        ├─ Audio ──decode──▶ PlaybackScheduler ─▶ AudioOutput ─▶ speaker
//!        ├─ Transcription ─▶ TranscriptAggregator ─▶ EventHandler
//!        ├─ ToolCall ──────▶ ToolBroker ──(response)──▶ TransportLink
//!        └─ Interrupted ───▶ PlaybackScheduler::stop
//! ```
//!
//! Audio devices and the network are pluggable: implement [`AudioBackend`] for
//! your platform's sound API and [`Transport`] for your agent service. A
//! Gemini Live transport ships behind the `gemini` feature.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use duplex_voice::{EventHandler, TranscriptSnapshot, ToolDeclaration, VoiceSession};
//! use duplex_voice::gemini::{GeminiLiveBackend, GeminiLiveTransport};
//!
//! struct Printer;
//!
//! #[async_trait::async_trait]
//! impl EventHandler for Printer {
//!     async fn on_transcript(&self, t: &TranscriptSnapshot) {
//!         if t.is_final {
//!             println!("you: {}\nagent: {}", t.input, t.output);
//!         }
//!     }
//! }
//!
//! let session = VoiceSession::builder()
//!     .transport(Arc::new(GeminiLiveTransport::new(GeminiLiveBackend::from_env()?)))
//!     .audio(Arc::new(my_audio_backend))
//!     .instruction("You are a friendly art tutor.")
//!     .tool_async(ToolDeclaration::new("draw_scene"), |call| async move {
//!         Ok(serde_json::json!({ "status": "drawn" }))
//!     })
//!     .event_handler(Printer)
//!     .build()?;
//!
//! session.connect().await?;
//! session.set_muted(false)?;
//! ```

pub mod audio;
pub mod capture;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod handler;
pub mod playback;
pub mod session;
pub mod tools;
pub mod transcript;
pub mod transport;

// Provider implementations
#[cfg(feature = "gemini")]
pub mod gemini;

// Re-exports
pub use audio::{AudioFormat, AudioFrame, EncodedChunk};
pub use capture::{CaptureOutcome, CapturePipeline, CaptureStats};
pub use config::{SessionConfig, SessionConfigBuilder, ToolDeclaration};
pub use device::{AudioBackend, AudioInput, AudioOutput, EndedSender, EntryId, FrameSink};
pub use error::{Result, VoiceError};
pub use events::{ClientMessage, ServerEvent, ToolCall, ToolResponse};
pub use handler::{EventHandler, NoOpEventHandler};
pub use playback::{PlaybackScheduler, ScheduledWindow};
pub use session::{SessionState, VoiceSession, VoiceSessionBuilder};
pub use tools::{AsyncToolHandler, FnToolHandler, ToolBroker, ToolHandler, ToolRegistry};
pub use transcript::{TranscriptAggregator, TranscriptSide, TranscriptSnapshot};
pub use transport::{BoxedLink, BoxedTransport, Transport, TransportLink};
