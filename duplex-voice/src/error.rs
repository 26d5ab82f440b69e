//! Error types for voice sessions.

use thiserror::Error;

/// Result type for voice session operations.
pub type Result<T> = std::result::Result<T, VoiceError>;

/// Errors that can occur while running a voice session.
///
/// Device and connection failures are fatal for the current connection and
/// move the session into its `Error` state. Malformed chunks and tool handler
/// failures are contained: they are logged or converted into a payload for the
/// remote agent and the session keeps running.
#[derive(Error, Debug)]
pub enum VoiceError {
    /// Microphone or playback device unavailable.
    #[error("Audio device error: {0}")]
    DeviceError(String),

    /// Transport negotiation or mid-session connection failure.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Inbound audio could not be decoded.
    #[error("Malformed audio chunk: {0}")]
    MalformedChunk(String),

    /// An injected tool handler failed.
    #[error("Tool handler error: {0}")]
    ToolHandlerError(String),

    /// The remote peer sent something we could not interpret.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Session not connected.
    #[error("Session not connected")]
    NotConnected,

    /// A connection is already live on this session.
    #[error("Session already connected")]
    AlreadyConnected,

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl VoiceError {
    /// Create a new device error.
    pub fn device<S: Into<String>>(msg: S) -> Self {
        Self::DeviceError(msg.into())
    }

    /// Create a new connection error.
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Self::ConnectionError(msg.into())
    }

    /// Create a new malformed chunk error.
    pub fn malformed<S: Into<String>>(msg: S) -> Self {
        Self::MalformedChunk(msg.into())
    }

    /// Create a new tool handler error.
    pub fn tool<S: Into<String>>(msg: S) -> Self {
        Self::ToolHandlerError(msg.into())
    }

    /// Create a new protocol error.
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::ProtocolError(msg.into())
    }

    /// Create a new configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Whether this error ends the current connection.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DeviceError(_) | Self::ConnectionError(_))
    }

    /// Copy of this error for a second observer, keeping the category.
    pub(crate) fn replicate(&self) -> Self {
        match self {
            Self::DeviceError(m) => Self::DeviceError(m.clone()),
            Self::ConnectionError(m) => Self::ConnectionError(m.clone()),
            Self::MalformedChunk(m) => Self::MalformedChunk(m.clone()),
            Self::ToolHandlerError(m) => Self::ToolHandlerError(m.clone()),
            Self::ProtocolError(m) => Self::ProtocolError(m.clone()),
            Self::NotConnected => Self::NotConnected,
            Self::AlreadyConnected => Self::AlreadyConnected,
            Self::ConfigError(m) => Self::ConfigError(m.clone()),
            Self::SerializationError(e) => Self::ProtocolError(e.to_string()),
            Self::IoError(e) => Self::IoError(std::io::Error::new(e.kind(), e.to_string())),
        }
    }
}
