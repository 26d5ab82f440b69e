//! Configuration types for voice sessions.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audio::AudioFormat;
use crate::error::{Result, VoiceError};

/// Samples per capture batch: 256 ms at 16 kHz.
pub const DEFAULT_CAPTURE_BATCH_SAMPLES: usize = 4096;

/// How long `connect` waits for the remote side to finish negotiation.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default bound on concurrently running tool handlers.
pub const DEFAULT_MAX_CONCURRENT_TOOLS: usize = 4;

/// Tool/function declaration advertised to the remote agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    /// Tool name.
    pub name: String,
    /// Tool description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

impl ToolDeclaration {
    /// Create a new tool declaration.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), description: None, parameters: None }
    }

    /// Set the tool description.
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Set the parameters schema.
    pub fn with_parameters(mut self, schema: Value) -> Self {
        self.parameters = Some(schema);
        self
    }
}

/// Configuration for a voice session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Model to use (provider-specific). The transport's default applies when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// System instruction for the agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,

    /// Voice to use for audio output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    /// Response modalities requested from the agent.
    pub modalities: Vec<String>,

    /// Temperature for response generation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Microphone audio format sent upstream.
    pub input_audio_format: AudioFormat,

    /// Agent audio format expected downstream.
    pub output_audio_format: AudioFormat,

    /// Ask the agent to transcribe the user's speech.
    pub input_transcription: bool,

    /// Ask the agent to transcribe its own speech.
    pub output_transcription: bool,

    /// Declared tools.
    pub tools: Vec<ToolDeclaration>,

    /// Samples per outbound capture batch.
    pub capture_batch_samples: usize,

    /// Negotiation timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// Maximum number of tool handlers running at once.
    pub max_concurrent_tools: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: None,
            instruction: None,
            voice: None,
            modalities: vec!["AUDIO".to_string()],
            temperature: None,
            input_audio_format: AudioFormat::pcm16_16khz(),
            output_audio_format: AudioFormat::pcm16_24khz(),
            input_transcription: true,
            output_transcription: true,
            tools: Vec::new(),
            capture_batch_samples: DEFAULT_CAPTURE_BATCH_SAMPLES,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
            max_concurrent_tools: DEFAULT_MAX_CONCURRENT_TOOLS,
        }
    }
}

impl SessionConfig {
    /// Create a new configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for SessionConfig.
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::new()
    }

    /// Parse a configuration from TOML text.
    ///
    /// ```toml
    /// model = "models/gemini-2.5-flash-native-audio-preview-09-2025"
    /// instruction = "You are a friendly art tutor."
    /// voice = "Puck"
    /// capture_batch_samples = 2048
    /// ```
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| VoiceError::config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            VoiceError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Check the configuration for values the session cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.capture_batch_samples == 0 {
            return Err(VoiceError::config("capture_batch_samples must be positive"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(VoiceError::config("connect_timeout_ms must be positive"));
        }
        if self.max_concurrent_tools == 0 {
            return Err(VoiceError::config("max_concurrent_tools must be positive"));
        }
        if self.input_audio_format.sample_rate == 0 || self.output_audio_format.sample_rate == 0 {
            return Err(VoiceError::config("audio sample rates must be positive"));
        }
        let mut seen = HashSet::new();
        for tool in &self.tools {
            if !seen.insert(tool.name.as_str()) {
                return Err(VoiceError::config(format!("duplicate tool: {}", tool.name)));
            }
        }
        Ok(())
    }

    /// Negotiation timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the system instruction.
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    /// Set the voice.
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    /// Add a tool declaration.
    pub fn with_tool(mut self, tool: ToolDeclaration) -> Self {
        self.tools.push(tool);
        self
    }

    /// Set multiple tools.
    pub fn with_tools(mut self, tools: Vec<ToolDeclaration>) -> Self {
        self.tools = tools;
        self
    }

    /// Set temperature.
    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    /// Set the capture batch size in samples.
    pub fn with_capture_batch(mut self, samples: usize) -> Self {
        self.capture_batch_samples = samples;
        self
    }
}

/// Builder for SessionConfig.
#[derive(Debug, Clone, Default)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the model.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
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

    /// Add a tool.
    pub fn tool(mut self, tool: ToolDeclaration) -> Self {
        self.config.tools.push(tool);
        self
    }

    /// Set temperature.
    pub fn temperature(mut self, temp: f32) -> Self {
        self.config.temperature = Some(temp);
        self
    }

    /// Toggle input and output transcription together.
    pub fn transcription(mut self, enabled: bool) -> Self {
        self.config.input_transcription = enabled;
        self.config.output_transcription = enabled;
        self
    }

    /// Set the capture batch size in samples.
    pub fn capture_batch_samples(mut self, samples: usize) -> Self {
        self.config.capture_batch_samples = samples;
        self
    }

    /// Set the negotiation timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Bound concurrently running tool handlers.
    pub fn max_concurrent_tools(mut self, max: usize) -> Self {
        self.config.max_concurrent_tools = max;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<SessionConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
