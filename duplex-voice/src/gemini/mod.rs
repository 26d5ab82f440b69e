//! Gemini Live API provider.
//!
//! Connects to Google's WebSocket-based Live API. Microphone audio goes up as
//! 16kHz mono PCM and agent audio comes down as 24kHz mono PCM.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use duplex_voice::VoiceSession;
//! use duplex_voice::gemini::{GeminiLiveBackend, GeminiLiveTransport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = GeminiLiveTransport::new(GeminiLiveBackend::from_env()?);
//!
//!     let session = VoiceSession::builder()
//!         .transport(Arc::new(transport))
//!         .audio(Arc::new(my_audio_backend()))
//!         .instruction("You are a helpful assistant.")
//!         .build()?;
//!
//!     session.connect().await?;
//!     session.set_muted(false)?;
//!     // Talk...
//!     session.disconnect().await?;
//!     Ok(())
//! }
//! ```

mod protocol;
mod session;
mod transport;

use secrecy::{ExposeSecret, SecretString};

use crate::error::{Result, VoiceError};

pub use session::GeminiLiveSession;
pub use transport::GeminiLiveTransport;

/// Gemini Live API WebSocket endpoint.
pub const GEMINI_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Default model for Gemini Live.
pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";

/// Environment variable read by [`GeminiLiveBackend::from_env`].
pub const API_KEY_ENV: &str = "GOOGLE_API_KEY";

/// Available voices for Gemini Live (varies by model).
pub const GEMINI_VOICES: &[&str] = &["Puck", "Charon", "Kore", "Fenrir", "Aoede"];

/// How to authenticate against the Live API.
#[derive(Clone)]
pub enum GeminiLiveBackend {
    /// Google AI Studio, authenticated with an API key.
    Studio {
        /// API key, passed as the `key` query parameter.
        api_key: SecretString,
    },
}

impl GeminiLiveBackend {
    /// AI Studio backend with the given key.
    pub fn studio(api_key: impl Into<String>) -> Self {
        Self::Studio { api_key: SecretString::from(api_key.into()) }
    }

    /// AI Studio backend with the key from `GOOGLE_API_KEY`.
    pub fn from_env() -> Result<Self> {
        match std::env::var(API_KEY_ENV) {
            Ok(key) if !key.trim().is_empty() => Ok(Self::studio(key.trim())),
            _ => Err(VoiceError::config(format!("{API_KEY_ENV} is not set"))),
        }
    }

    pub(crate) fn api_key(&self) -> &str {
        match self {
            Self::Studio { api_key } => api_key.expose_secret(),
        }
    }
}

impl std::fmt::Debug for GeminiLiveBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Studio { .. } => {
                f.debug_struct("Studio").field("api_key", &"[REDACTED]").finish()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_key() {
        let backend = GeminiLiveBackend::studio("super-secret");
        let debug = format!("{backend:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("REDACTED"));
        assert_eq!(backend.api_key(), "super-secret");
    }
}
