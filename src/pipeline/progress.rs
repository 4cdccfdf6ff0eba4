//! Progress and transcript sinks.

use serde::Serialize;
use tracing::info;

/// Position of a chunk in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkProgress {
    /// 0-based chunk index.
    pub index: usize,
    /// Number of chunks.
    pub total: usize,
    /// Share of chunks finished, 0 to 100.
    pub percent: u8,
}

impl ChunkProgress {
    /// Progress after `finished` of `total` chunks, attributed to `index`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(index: usize, finished: usize, total: usize) -> Self {
        let percent = if total == 0 {
            100
        } else {
            (finished.min(total) * 100 / total) as u8
        };
        Self {
            index,
            total,
            percent,
        }
    }
}

/// One progress notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
    /// Human-readable status line.
    pub message: String,
    /// Chunk position, when the update concerns a chunk.
    pub chunk: Option<ChunkProgress>,
}

impl ProgressUpdate {
    /// A status line without chunk position.
    #[must_use]
    pub fn status(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            chunk: None,
        }
    }

    /// A status line for a chunk.
    #[must_use]
    pub fn chunk(message: impl Into<String>, chunk: ChunkProgress) -> Self {
        Self {
            message: message.into(),
            chunk: Some(chunk),
        }
    }
}

/// Receives progress updates and streamed answer tokens.
pub trait ProgressSink: Send + Sync {
    /// Called after each state transition.
    fn on_progress(&self, update: &ProgressUpdate);

    /// Called for each token of the user-facing answer.
    fn on_token(&self, _token: &str) {}
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn on_progress(&self, _update: &ProgressUpdate) {}
}

/// Logs progress through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn on_progress(&self, update: &ProgressUpdate) {
        match update.chunk {
            Some(chunk) => info!(
                chunk = chunk.index + 1,
                total = chunk.total,
                percent = chunk.percent,
                "{}",
                update.message
            ),
            None => info!("{}", update.message),
        }
    }
}
