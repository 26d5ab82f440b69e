//! Audio device abstractions.
//!
//! The session never talks to hardware directly. An [`AudioBackend`] opens one
//! capture stream and one playback sink per connection; both are closed exactly
//! once when the connection is torn down.
//!
//! | Trait | Role |
//! |---|---|
//! | [`AudioBackend`] | Opens devices for a connection |
//! | [`AudioInput`] | Live microphone stream feeding a [`FrameSink`] |
//! | [`AudioOutput`] | Clocked playback sink accepting scheduled frames |

use tokio::sync::mpsc;

use crate::audio::{AudioFormat, AudioFrame};
use crate::error::Result;

/// Identifier of one scheduled playback entry.
pub type EntryId = u64;

/// Callback invoked by the capture stream with each buffer of samples.
///
/// Called from the device's real-time thread; it must not block.
pub type FrameSink = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Channel on which a playback sink reports entries that finished naturally.
pub type EndedSender = mpsc::UnboundedSender<EntryId>;

/// Opens capture and playback devices.
pub trait AudioBackend: Send + Sync {
    /// Start capturing at `format`, delivering samples to `sink`.
    ///
    /// Fails with [`VoiceError::DeviceError`](crate::VoiceError::DeviceError)
    /// if the microphone is unavailable.
    fn open_input(&self, format: AudioFormat, sink: FrameSink) -> Result<Box<dyn AudioInput>>;

    /// Open the playback sink at `format`.
    ///
    /// The sink reports naturally finished entries on `ended`.
    fn open_output(&self, format: AudioFormat, ended: EndedSender) -> Result<Box<dyn AudioOutput>>;
}

/// A running capture stream.
pub trait AudioInput: Send + Sync {
    /// Stop capturing and release the device.
    fn close(&self);
}

/// A clocked playback sink.
pub trait AudioOutput: Send + Sync {
    /// Current device clock in seconds.
    fn current_time(&self) -> f64;

    /// Schedule `frame` to begin exactly at `start_at` on the device clock.
    fn schedule(&self, id: EntryId, frame: &AudioFrame, start_at: f64) -> Result<()>;

    /// Cancel a scheduled or playing entry. Unknown ids are ignored.
    fn cancel(&self, id: EntryId);

    /// Stop playback and release the device.
    fn close(&self);
}
