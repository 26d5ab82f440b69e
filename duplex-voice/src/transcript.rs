//! Per-turn transcript accumulation.

use serde::{Deserialize, Serialize};

/// Which side of the conversation a fragment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptSide {
    /// The local user.
    Input,
    /// The remote agent.
    Output,
}

/// Transcript of the current turn as of one event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptSnapshot {
    /// Everything the user said this turn.
    pub input: String,
    /// Everything the agent said this turn.
    pub output: String,
    /// Set on the last snapshot of a turn.
    pub is_final: bool,
}

/// Accumulates transcription fragments until the turn completes.
///
/// Buffers are append-only within a turn and reset together, right after the
/// final snapshot is produced.
#[derive(Debug, Default)]
pub struct TranscriptAggregator {
    input: String,
    output: String,
}

impl TranscriptAggregator {
    /// Create an empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment and return the updated, non-final snapshot.
    pub fn push(&mut self, side: TranscriptSide, fragment: &str) -> TranscriptSnapshot {
        match side {
            TranscriptSide::Input => self.input.push_str(fragment),
            TranscriptSide::Output => self.output.push_str(fragment),
        }
        self.snapshot(false)
    }

    /// Close the turn: return the final snapshot and start a new, empty turn.
    pub fn complete_turn(&mut self) -> TranscriptSnapshot {
        TranscriptSnapshot {
            input: std::mem::take(&mut self.input),
            output: std::mem::take(&mut self.output),
            is_final: true,
        }
    }

    /// Text received from the user so far this turn.
    pub fn input(&self) -> &str {
        &self.input
    }

    /// Text received from the agent so far this turn.
    pub fn output(&self) -> &str {
        &self.output
    }

    fn snapshot(&self, is_final: bool) -> TranscriptSnapshot {
        TranscriptSnapshot { input: self.input.clone(), output: self.output.clone(), is_final }
    }
}
