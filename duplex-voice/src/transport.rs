//! Transport traits: the duplex channel to the remote agent.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::config::SessionConfig;
use crate::error::Result;
use crate::events::{ClientMessage, ServerEvent};

/// A live, message-oriented connection to the remote agent.
///
/// # Example
///
/// ```rust,ignore
/// use duplex_voice::{ServerEvent, TransportLink};
///
/// async fn drain(link: &dyn TransportLink) {
///     while let Some(event) = link.next_event().await {
///         match event {
///             Ok(ServerEvent::Audio(chunk)) => { /* schedule playback */ }
///             Ok(ServerEvent::TurnComplete) => break,
///             Ok(_) => {}
///             Err(e) => tracing::warn!(error = %e, "inbound error"),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait TransportLink: Send + Sync {
    /// Identifier of this connection, for logs.
    fn link_id(&self) -> &str;

    /// Check if the connection is still open.
    fn is_connected(&self) -> bool;

    /// Queue a message for delivery.
    ///
    /// Never waits on the network: messages go into an internal queue drained by
    /// a writer task, in the order they were sent. Returns `false` when the link
    /// is closed and the message was dropped.
    fn send(&self, message: ClientMessage) -> bool;

    /// Get the next event from the remote agent.
    ///
    /// Returns `None` once the connection has ended.
    async fn next_event(&self) -> Option<Result<ServerEvent>>;

    /// Close the connection. Only the first call has any effect.
    async fn close(&self) -> Result<()>;
}

/// Shared handle to a live link.
pub type BoxedLink = Arc<dyn TransportLink>;

/// Factory for transport links.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Get the provider name.
    fn provider(&self) -> &str;

    /// Open and negotiate a new link.
    ///
    /// Fails with [`VoiceError::ConnectionError`](crate::VoiceError::ConnectionError)
    /// on network, authentication or negotiation failure.
    async fn connect(&self, config: &SessionConfig) -> Result<BoxedLink>;
}

/// Shared transport.
pub type BoxedTransport = Arc<dyn Transport>;

/// Unbounded outbound queue that turns into a no-op once shut.
#[derive(Debug)]
pub struct OutboundQueue<T> {
    sender: Mutex<Option<mpsc::UnboundedSender<T>>>,
}

impl<T> OutboundQueue<T> {
    /// Create a queue and the receiver its writer drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { sender: Mutex::new(Some(tx)) }, rx)
    }

    /// Enqueue a value. Returns `false` if the queue is shut or the writer is gone.
    pub fn push(&self, value: T) -> bool {
        match self.sender.lock().as_ref() {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    /// Stop accepting values. Returns `true` only for the first call.
    ///
    /// Values already queued are still delivered to the receiver.
    pub fn shut(&self) -> bool {
        self.sender.lock().take().is_some()
    }

    /// Whether the queue still accepts values.
    pub fn is_open(&self) -> bool {
        self.sender.lock().is_some()
    }
}
