//! Callbacks for observing a running session.

use async_trait::async_trait;

use crate::error::VoiceError;
use crate::events::ToolCall;
use crate::session::SessionState;
use crate::transcript::TranscriptSnapshot;

/// Event handler for session activity.
///
/// All methods default to no-ops. They are awaited one at a time on a
/// dedicated task, in the order the underlying events arrived. A slow handler
/// delays later notifications but never audio.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Called on every state transition.
    async fn on_state(&self, _state: &SessionState) {}

    /// Called with the current turn's transcript after each fragment, and once
    /// more with `is_final` set when the turn completes.
    async fn on_transcript(&self, _snapshot: &TranscriptSnapshot) {}

    /// Called when the agent starts or stops speaking.
    async fn on_speaking(&self, _speaking: bool) {}

    /// Called with agent text that is not part of its spoken transcript.
    async fn on_text(&self, _text: &str) {}

    /// Called when the agent requests a tool call, before it is dispatched.
    async fn on_tool_call(&self, _call: &ToolCall) {}

    /// Called when the server announces it will disconnect soon.
    async fn on_go_away(&self, _time_left: Option<&str>) {}

    /// Called on contained errors (malformed audio, protocol noise) and on the
    /// fatal error that ends a connection.
    async fn on_error(&self, _error: &VoiceError) {}
}

/// Default no-op event handler.
#[derive(Debug, Clone, Default)]
pub struct NoOpEventHandler;

#[async_trait]
impl EventHandler for NoOpEventHandler {}
