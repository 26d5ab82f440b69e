//! Gemini Live link over a WebSocket.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::protocol::{self, ClientFrame};
use crate::audio::AudioFormat;
use crate::config::SessionConfig;
use crate::error::{Result, VoiceError};
use crate::events::{ClientMessage, ServerEvent};
use crate::transport::{OutboundQueue, TransportLink};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// How long `close` waits for queued frames and the close frame to flush.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

struct Reader {
    source: WsSource,
    pending: VecDeque<ServerEvent>,
}

/// Gemini Live session.
///
/// Outbound frames go through an unbounded queue drained by a writer task, so
/// `send` never waits on the socket. Inbound frames are read on demand by
/// `next_event`; a frame carrying several events is buffered and handed out
/// one event per call.
pub struct GeminiLiveSession {
    session_id: String,
    connected: Arc<AtomicBool>,
    closed: AtomicBool,
    outbound: OutboundQueue<Message>,
    writer: Mutex<Option<JoinHandle<()>>>,
    reader: tokio::sync::Mutex<Reader>,
    output_format: AudioFormat,
}

impl GeminiLiveSession {
    /// Send the setup frame on an open socket and wait for `setupComplete`.
    pub(crate) async fn negotiate(
        stream: WsStream,
        config: &SessionConfig,
        model: &str,
    ) -> Result<Self> {
        let (sink, source) = stream.split();
        let (outbound, rx) = OutboundQueue::new();
        let connected = Arc::new(AtomicBool::new(true));
        let writer = tokio::spawn(run_writer(sink, rx, connected.clone()));

        let session = Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            connected,
            closed: AtomicBool::new(false),
            outbound,
            writer: Mutex::new(Some(writer)),
            reader: tokio::sync::Mutex::new(Reader { source, pending: VecDeque::new() }),
            output_format: config.output_audio_format,
        };

        tracing::info!(
            session_id = %session.session_id,
            model_id = %model,
            "Sending setup message"
        );
        session.push_frame(&protocol::setup_frame(config, model))?;

        match tokio::time::timeout(config.connect_timeout(), session.await_setup()).await {
            Ok(Ok(())) => Ok(session),
            Ok(Err(e)) => {
                let _ = session.close().await;
                Err(e)
            }
            Err(_) => {
                let _ = session.close().await;
                Err(VoiceError::connection(format!(
                    "no setupComplete within {}ms",
                    config.connect_timeout_ms
                )))
            }
        }
    }

    async fn await_setup(&self) -> Result<()> {
        let mut reader = self.reader.lock().await;
        loop {
            let events = match self.read_frame(&mut reader).await {
                Some(Ok(events)) => events,
                Some(Err(e)) if e.is_fatal() => return Err(e),
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Ignoring frame during setup");
                    continue;
                }
                None => return Err(VoiceError::connection("connection closed during setup")),
            };

            let mut events = events.into_iter();
            for event in events.by_ref() {
                if event == ServerEvent::SetupComplete {
                    tracing::info!(session_id = %self.session_id, "Setup complete");
                    // Anything after the ack in the same frame is kept for next_event.
                    reader.pending.extend(events);
                    return Ok(());
                }
                tracing::debug!(?event, "Event before setupComplete");
            }
        }
    }

    /// Read one socket frame and translate it. `None` when the socket ended.
    async fn read_frame(&self, reader: &mut Reader) -> Option<Result<Vec<ServerEvent>>> {
        loop {
            let text = match reader.source.next().await {
                Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => text,
                    Err(e) => {
                        return Some(Err(VoiceError::protocol(format!(
                            "Invalid UTF-8 in binary message: {e}"
                        ))));
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(
                        session_id = %self.session_id,
                        ?frame,
                        "Server closed connection"
                    );
                    self.connected.store(false, Ordering::SeqCst);
                    return None;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Some(Err(VoiceError::connection(format!("Receive error: {e}"))));
                }
                None => {
                    self.connected.store(false, Ordering::SeqCst);
                    return None;
                }
            };

            tracing::trace!(raw = %text, "Gemini frame");
            return Some(protocol::translate(&text, self.output_format));
        }
    }

    fn push_frame<T: Serialize>(&self, frame: &T) -> Result<()> {
        let text = serde_json::to_string(frame)?;
        if self.outbound.push(Message::Text(text.into())) {
            Ok(())
        } else {
            Err(VoiceError::NotConnected)
        }
    }
}

async fn run_writer(
    mut sink: WsSink,
    mut rx: mpsc::UnboundedReceiver<Message>,
    connected: Arc<AtomicBool>,
) {
    while let Some(message) = rx.recv().await {
        if let Err(e) = sink.send(message).await {
            tracing::warn!(error = %e, "WebSocket send failed");
            connected.store(false, Ordering::SeqCst);
            return;
        }
    }
    // Queue shut: everything before the close has been flushed.
    if let Err(e) = sink.send(Message::Close(None)).await {
        tracing::debug!(error = %e, "Close frame not delivered");
    }
    let _ = sink.close().await;
}

#[async_trait]
impl TransportLink for GeminiLiveSession {
    fn link_id(&self) -> &str {
        &self.session_id
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }

    fn send(&self, message: ClientMessage) -> bool {
        if !self.is_connected() {
            return false;
        }
        let frame: ClientFrame = protocol::client_frame(message);
        match self.push_frame(&frame) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "Dropping outbound message");
                false
            }
        }
    }

    async fn next_event(&self) -> Option<Result<ServerEvent>> {
        let mut reader = self.reader.lock().await;
        loop {
            if let Some(event) = reader.pending.pop_front() {
                return Some(Ok(event));
            }
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            match self.read_frame(&mut reader).await? {
                Ok(events) => reader.pending.extend(events),
                Err(e) => return Some(Err(e)),
            }
        }
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!(session_id = %self.session_id, "Closing Gemini Live session");
        self.connected.store(false, Ordering::SeqCst);
        self.outbound.shut();

        let writer = self.writer.lock().take();
        let Some(mut writer) = writer else {
            return Ok(());
        };
        match tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut writer).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if e.is_cancelled() => Ok(()),
            Ok(Err(e)) => Err(VoiceError::connection(format!("writer task failed: {e}"))),
            Err(_) => {
                tracing::warn!(session_id = %self.session_id, "Close flush timed out");
                writer.abort();
                Ok(())
            }
        }
    }
}

impl Drop for GeminiLiveSession {
    fn drop(&mut self) {
        self.outbound.shut();
    }
}

impl std::fmt::Debug for GeminiLiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiLiveSession")
            .field("session_id", &self.session_id)
            .field("connected", &self.is_connected())
            .finish()
    }
}
