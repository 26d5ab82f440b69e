//! Gemini Live transport factory.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use url::Url;

use super::session::GeminiLiveSession;
use super::{DEFAULT_MODEL, GEMINI_LIVE_URL, GEMINI_VOICES, GeminiLiveBackend};
use crate::audio::AudioFormat;
use crate::config::SessionConfig;
use crate::error::{Result, VoiceError};
use crate::transport::{BoxedLink, Transport};

/// Opens Gemini Live sessions.
///
/// # Example
///
/// ```rust,ignore
/// use duplex_voice::gemini::{GeminiLiveBackend, GeminiLiveTransport};
///
/// let transport = GeminiLiveTransport::new(GeminiLiveBackend::studio("key"))
///     .with_model("models/gemini-live-2.5-flash-preview");
/// ```
#[derive(Debug, Clone)]
pub struct GeminiLiveTransport {
    backend: GeminiLiveBackend,
    model_id: String,
    endpoint: String,
}

impl GeminiLiveTransport {
    /// Create a transport using the default model and endpoint.
    pub fn new(backend: GeminiLiveBackend) -> Self {
        Self { backend, model_id: DEFAULT_MODEL.to_string(), endpoint: GEMINI_LIVE_URL.to_string() }
    }

    /// Use another model when the session config does not name one.
    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    /// Point at a different WebSocket endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Default model id.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Voices known to work with the Live API.
    pub fn available_voices(&self) -> Vec<&str> {
        GEMINI_VOICES.to_vec()
    }

    /// Input formats the API accepts.
    pub fn supported_input_formats(&self) -> Vec<AudioFormat> {
        vec![AudioFormat::pcm16_16khz()]
    }

    /// Output formats the API produces.
    pub fn supported_output_formats(&self) -> Vec<AudioFormat> {
        vec![AudioFormat::pcm16_24khz()]
    }

    fn request_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| VoiceError::config(format!("invalid endpoint {}: {e}", self.endpoint)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(VoiceError::config(format!(
                "endpoint must be ws:// or wss://, got {}",
                url.scheme()
            )));
        }
        url.query_pairs_mut().append_pair("key", self.backend.api_key());
        Ok(url)
    }
}

#[async_trait]
impl Transport for GeminiLiveTransport {
    fn provider(&self) -> &str {
        "gemini"
    }

    async fn connect(&self, config: &SessionConfig) -> Result<BoxedLink> {
        // Another crate may already have installed a provider.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let model = config.model.as_deref().unwrap_or(&self.model_id);
        let request = self
            .request_url()?
            .as_str()
            .into_client_request()
            .map_err(|e| VoiceError::connection(format!("Failed to create client request: {e}")))?;

        tracing::info!(model_id = %model, endpoint = %self.endpoint, "Opening Gemini Live socket");
        let (stream, _response) =
            tokio::time::timeout(config.connect_timeout(), connect_async(request))
                .await
                .map_err(|_| {
                    VoiceError::connection(format!(
                        "WebSocket connect timed out after {}ms",
                        config.connect_timeout_ms
                    ))
                })?
                .map_err(|e| VoiceError::connection(format!("WebSocket connect error: {e}")))?;

        let session = GeminiLiveSession::negotiate(stream, config, model).await?;
        Ok(Arc::new(session))
    }
}
