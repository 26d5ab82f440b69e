//! Event types for duplex voice communication.
//!
//! These are provider-neutral: a transport translates its own wire format into
//! [`ServerEvent`]s and renders [`ClientMessage`]s back out. Audio payloads stay
//! base64 text ([`EncodedChunk`]) until the session decodes them, so a corrupt
//! fragment is only dropped where it is about to be played.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audio::EncodedChunk;

// ── Client Messages ─────────────────────────────────────────────────────

/// Messages sent from the client to the remote agent.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// A realtime microphone chunk.
    RealtimeAudio(EncodedChunk),

    /// An image submitted mid-session.
    Image {
        /// MIME type, e.g. `image/jpeg`.
        mime_type: String,
        /// Base64-encoded image bytes.
        data: String,
    },

    /// A user text turn.
    Text {
        /// The text content.
        text: String,
        /// Whether the agent should respond now.
        turn_complete: bool,
    },

    /// Result of an agent-initiated tool call.
    ToolResponse(ToolResponse),
}

impl ClientMessage {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RealtimeAudio(_) => "realtime_audio",
            Self::Image { .. } => "image",
            Self::Text { .. } => "text",
            Self::ToolResponse(_) => "tool_response",
        }
    }
}

// ── Server Events ───────────────────────────────────────────────────────

/// Events received from the remote agent, in delivery order.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Negotiation finished; the session is ready for input.
    SetupComplete,

    /// Incremental transcription of the user's speech.
    InputTranscription(String),

    /// Incremental transcription of the agent's speech.
    OutputTranscription(String),

    /// Text produced by the agent outside of its transcript.
    ModelText(String),

    /// A fragment of agent audio.
    Audio(EncodedChunk),

    /// The current turn is finished.
    TurnComplete,

    /// The user barged in; queued agent audio must stop.
    Interrupted,

    /// The agent asks for one or more functions to run.
    ToolCall(Vec<ToolCall>),

    /// The agent withdrew earlier tool calls.
    ToolCallCancelled(Vec<String>),

    /// The server will close the connection soon.
    GoAway {
        /// Remaining time as reported by the server.
        time_left: Option<String>,
    },
}

/// A function call requested by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (used for responses).
    pub call_id: String,
    /// Tool/function name.
    pub name: String,
    /// Arguments as a JSON object.
    pub arguments: Value,
}

impl ToolCall {
    /// Create a new tool call.
    pub fn new(call_id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self { call_id: call_id.into(), name: name.into(), arguments }
    }
}

/// A tool response to send back to the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    /// The call ID being responded to.
    pub call_id: String,
    /// The function name from the call.
    pub name: String,
    /// The result/output of the tool execution.
    pub output: Value,
}

impl ToolResponse {
    /// Create a response correlated with `call`.
    pub fn for_call(call: &ToolCall, output: Value) -> Self {
        Self { call_id: call.call_id.clone(), name: call.name.clone(), output }
    }

    /// Create an error response correlated with `call`.
    pub fn error(call: &ToolCall, message: impl Into<String>) -> Self {
        Self::for_call(call, serde_json::json!({ "error": message.into() }))
    }

    /// Whether this response carries an error payload.
    pub fn is_error(&self) -> bool {
        self.output.get("error").is_some()
    }
}
