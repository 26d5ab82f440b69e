//! Microphone capture pipeline.
//!
//! Runs on the audio device's real-time thread. Each full batch is either sent
//! or discarded right away; nothing is queued while muted or disconnected.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::audio::{self, AudioFrame, FrameBatcher};
use crate::device::FrameSink;
use crate::events::ClientMessage;
use crate::transport::BoxedLink;

/// Slot holding the current link, if any. Shared between the session and the
/// capture thread.
pub type LinkSlot = RwLock<Option<BoxedLink>>;

/// What happened to one capture batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Encoded and queued on the link.
    Sent,
    /// Discarded because the microphone is muted.
    Muted,
    /// Discarded because no link is live.
    Disconnected,
    /// Discarded because the link slot was busy or the link refused it.
    Dropped,
}

/// Counters for capture batches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Batches queued on the link.
    pub sent: u64,
    /// Batches discarded for any reason.
    pub discarded: u64,
}

/// Batches, encodes and forwards microphone audio.
pub struct CapturePipeline {
    sample_rate: u32,
    muted: Arc<AtomicBool>,
    link: Arc<LinkSlot>,
    batcher: Mutex<FrameBatcher>,
    sent: AtomicU64,
    discarded: AtomicU64,
}

impl CapturePipeline {
    /// Create a pipeline sending `batch_samples`-sized frames at `sample_rate`.
    pub fn new(
        sample_rate: u32,
        batch_samples: usize,
        muted: Arc<AtomicBool>,
        link: Arc<LinkSlot>,
    ) -> Self {
        Self {
            sample_rate,
            muted,
            link,
            batcher: Mutex::new(FrameBatcher::new(batch_samples)),
            sent: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// Feed raw device samples. Returns the outcome of every completed batch.
    pub fn push_samples(&self, samples: &[f32]) -> Vec<CaptureOutcome> {
        if self.muted.load(Ordering::Acquire) {
            self.batcher.lock().clear();
            return Vec::new();
        }

        let batches = self.batcher.lock().push(samples);
        batches
            .into_iter()
            .map(|batch| self.on_frame(&AudioFrame::new(batch, self.sample_rate)))
            .collect()
    }

    /// Process one full frame.
    pub fn on_frame(&self, frame: &AudioFrame) -> CaptureOutcome {
        let outcome = self.forward(frame);
        match outcome {
            CaptureOutcome::Sent => self.sent.fetch_add(1, Ordering::Relaxed),
            _ => self.discarded.fetch_add(1, Ordering::Relaxed),
        };
        outcome
    }

    fn forward(&self, frame: &AudioFrame) -> CaptureOutcome {
        if self.muted.load(Ordering::Acquire) {
            return CaptureOutcome::Muted;
        }

        // Never wait for the slot on the audio thread.
        let Some(slot) = self.link.try_read() else {
            return CaptureOutcome::Dropped;
        };
        let Some(link) = slot.as_ref() else {
            return CaptureOutcome::Disconnected;
        };

        let chunk = audio::encode(frame);
        if link.send(ClientMessage::RealtimeAudio(chunk)) {
            CaptureOutcome::Sent
        } else {
            CaptureOutcome::Dropped
        }
    }

    /// Drop any partially filled batch.
    pub fn reset(&self) {
        self.batcher.lock().clear();
    }

    /// Batch counters since creation.
    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            sent: self.sent.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }

    /// Wrap the pipeline into a device callback.
    pub fn into_sink(self: Arc<Self>) -> FrameSink {
        Box::new(move |samples: &[f32]| {
            self.push_samples(samples);
        })
    }
}

impl std::fmt::Debug for CapturePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturePipeline")
            .field("sample_rate", &self.sample_rate)
            .field("muted", &self.muted.load(Ordering::Relaxed))
            .field("stats", &self.stats())
            .finish()
    }
}
