//! Gemini Live wire messages and their translation to session events.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::audio::{AudioFormat, EncodedChunk};
use crate::config::{SessionConfig, ToolDeclaration};
use crate::error::{Result, VoiceError};
use crate::events::{ClientMessage, ServerEvent, ToolCall};

// ── Outbound ────────────────────────────────────────────────────────────

/// Top-level client frame. Exactly one field is set.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ClientFrame {
    #[serde(skip_serializing_if = "Option::is_none")]
    setup: Option<Setup>,
    #[serde(skip_serializing_if = "Option::is_none")]
    realtime_input: Option<RealtimeInput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_content: Option<ClientContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_response: Option<ToolResponseFrame>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Setup {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolSet>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    input_audio_transcription: Option<Empty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_audio_transcription: Option<Empty>,
}

#[derive(Debug, Clone, Serialize)]
struct Empty {}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speech_config: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolSet {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Clone, Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<Blob>,
    #[serde(default, skip_serializing)]
    thought: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Blob {
    mime_type: String,
    data: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInput {
    media_chunks: Vec<Blob>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientContent {
    turns: Vec<Turn>,
    turn_complete: bool,
}

#[derive(Debug, Clone, Serialize)]
struct Turn {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolResponseFrame {
    function_responses: Vec<FunctionResponse>,
}

#[derive(Debug, Clone, Serialize)]
struct FunctionResponse {
    id: String,
    name: String,
    response: Value,
}

impl Part {
    fn text(text: impl Into<String>) -> Self {
        Self { text: Some(text.into()), ..Default::default() }
    }
}

/// Build the setup frame sent right after the socket opens.
pub(crate) fn setup_frame(config: &SessionConfig, model: &str) -> ClientFrame {
    let speech_config = config.voice.as_ref().map(|voice| {
        json!({
            "voiceConfig": {
                "prebuiltVoiceConfig": { "voiceName": voice }
            }
        })
    });

    ClientFrame {
        setup: Some(Setup {
            model: model.to_string(),
            system_instruction: config
                .instruction
                .as_ref()
                .map(|text| Content { parts: vec![Part::text(text.as_str())] }),
            generation_config: GenerationConfig {
                response_modalities: config.modalities.clone(),
                speech_config,
                temperature: config.temperature,
            },
            tools: convert_tools(&config.tools),
            input_audio_transcription: config.input_transcription.then_some(Empty {}),
            output_audio_transcription: config.output_transcription.then_some(Empty {}),
        }),
        ..Default::default()
    }
}

/// Render a client message as a wire frame.
pub(crate) fn client_frame(message: ClientMessage) -> ClientFrame {
    match message {
        ClientMessage::RealtimeAudio(chunk) => ClientFrame {
            realtime_input: Some(RealtimeInput {
                media_chunks: vec![Blob { mime_type: chunk.mime_type(), data: chunk.data }],
            }),
            ..Default::default()
        },
        ClientMessage::Image { mime_type, data } => ClientFrame {
            realtime_input: Some(RealtimeInput { media_chunks: vec![Blob { mime_type, data }] }),
            ..Default::default()
        },
        ClientMessage::Text { text, turn_complete } => ClientFrame {
            client_content: Some(ClientContent {
                turns: vec![Turn { role: "user".to_string(), parts: vec![Part::text(text)] }],
                turn_complete,
            }),
            ..Default::default()
        },
        ClientMessage::ToolResponse(response) => {
            // The API only accepts objects as function responses.
            let output = match response.output {
                Value::Object(_) => response.output,
                other => json!({ "result": other }),
            };
            ClientFrame {
                tool_response: Some(ToolResponseFrame {
                    function_responses: vec![FunctionResponse {
                        id: response.call_id,
                        name: response.name,
                        response: output,
                    }],
                }),
                ..Default::default()
            }
        }
    }
}

fn convert_tools(tools: &[ToolDeclaration]) -> Option<Vec<ToolSet>> {
    if tools.is_empty() {
        return None;
    }
    let function_declarations = tools
        .iter()
        .map(|t| FunctionDeclaration {
            name: t.name.clone(),
            description: t.description.clone().unwrap_or_default(),
            parameters: t
                .parameters
                .clone()
                .unwrap_or_else(|| json!({ "type": "object", "properties": {} })),
        })
        .collect();
    Some(vec![ToolSet { function_declarations }])
}

// ── Inbound ─────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerFrame {
    setup_complete: Option<Value>,
    server_content: Option<ServerContent>,
    tool_call: Option<ToolCallFrame>,
    tool_call_cancellation: Option<ToolCallCancellation>,
    go_away: Option<GoAway>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<Content>,
    #[serde(default)]
    turn_complete: bool,
    #[serde(default)]
    interrupted: bool,
    input_transcription: Option<Transcription>,
    output_transcription: Option<Transcription>,
}

#[derive(Debug, Default, Deserialize)]
struct Transcription {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolCallFrame {
    #[serde(default)]
    function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    #[serde(default)]
    id: String,
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Default, Deserialize)]
struct ToolCallCancellation {
    #[serde(default)]
    ids: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoAway {
    time_left: Option<String>,
}

/// Translate one server frame into session events, in delivery order.
///
/// Audio parts without a `rate` parameter are tagged with `output_format`.
/// A frame with nothing we understand yields no events.
pub(crate) fn translate(raw: &str, output_format: AudioFormat) -> Result<Vec<ServerEvent>> {
    let frame: ServerFrame = serde_json::from_str(raw)
        .map_err(|e| VoiceError::protocol(format!("unparseable server frame: {e}")))?;

    let mut events = Vec::new();

    if frame.setup_complete.is_some() {
        events.push(ServerEvent::SetupComplete);
    }

    if let Some(content) = frame.server_content {
        if content.interrupted {
            events.push(ServerEvent::Interrupted);
        }
        if let Some(t) = content.input_transcription.filter(|t| !t.text.is_empty()) {
            events.push(ServerEvent::InputTranscription(t.text));
        }
        for part in content.model_turn.map(|turn| turn.parts).unwrap_or_default() {
            if let Some(blob) = part.inline_data {
                match AudioFormat::from_mime(&blob.mime_type, output_format.sample_rate) {
                    Ok(format) => {
                        events.push(ServerEvent::Audio(EncodedChunk::new(format, blob.data)))
                    }
                    Err(_) => {
                        tracing::debug!(
                            mime_type = %blob.mime_type,
                            "Skipping non-audio inline data"
                        );
                    }
                }
            }
            if let Some(text) = part.text.filter(|t| !t.is_empty() && !part.thought) {
                events.push(ServerEvent::ModelText(text));
            }
        }
        if let Some(t) = content.output_transcription.filter(|t| !t.text.is_empty()) {
            events.push(ServerEvent::OutputTranscription(t.text));
        }
        if content.turn_complete {
            events.push(ServerEvent::TurnComplete);
        }
    }

    if let Some(tool_call) = frame.tool_call {
        let calls: Vec<ToolCall> = tool_call
            .function_calls
            .into_iter()
            .map(|call| {
                let id =
                    if call.id.is_empty() { uuid::Uuid::new_v4().to_string() } else { call.id };
                let args = if call.args.is_null() { json!({}) } else { call.args };
                ToolCall::new(id, call.name, args)
            })
            .collect();
        if !calls.is_empty() {
            events.push(ServerEvent::ToolCall(calls));
        }
    }

    if let Some(cancellation) = frame.tool_call_cancellation {
        if !cancellation.ids.is_empty() {
            events.push(ServerEvent::ToolCallCancelled(cancellation.ids));
        }
    }

    if let Some(go_away) = frame.go_away {
        events.push(ServerEvent::GoAway { time_left: go_away.time_left });
    }

    Ok(events)
}
