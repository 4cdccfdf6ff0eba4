//! Per-chunk outcomes and processed documents.

use serde::{Deserialize, Serialize};

/// Terminal outcome of one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkOutcome {
    /// The model produced a usable summary.
    Succeeded,
    /// Both attempts failed.
    Failed,
}

/// Summary of one chunk, one-to-one with [`crate::core::Chunk`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSummary {
    /// Index of the source chunk.
    pub index: usize,
    /// Summary text; the last failure reason when the chunk failed.
    pub text: String,
    /// Terminal outcome.
    pub outcome: ChunkOutcome,
    /// Attempts made (1 or 2).
    pub attempts: u8,
}

impl ChunkSummary {
    /// Creates a successful summary.
    #[must_use]
    pub fn succeeded(index: usize, text: impl Into<String>, attempts: u8) -> Self {
        Self {
            index,
            text: text.into(),
            outcome: ChunkOutcome::Succeeded,
            attempts,
        }
    }

    /// Creates a failed summary carrying the last failure reason.
    #[must_use]
    pub fn failed(index: usize, reason: impl Into<String>, attempts: u8) -> Self {
        Self {
            index,
            text: reason.into(),
            outcome: ChunkOutcome::Failed,
            attempts,
        }
    }

    /// Returns true if the chunk succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome == ChunkOutcome::Succeeded
    }
}

/// Ordered chunk summaries of one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedDocument {
    /// Document identity (file name).
    pub document_id: String,
    /// Summaries in chunk order.
    pub summaries: Vec<ChunkSummary>,
}

impl ProcessedDocument {
    /// Creates a processed document.
    #[must_use]
    pub fn new(document_id: impl Into<String>, summaries: Vec<ChunkSummary>) -> Self {
        Self {
            document_id: document_id.into(),
            summaries,
        }
    }

    /// Iterates over the successful summaries, in chunk order.
    pub fn succeeded(&self) -> impl Iterator<Item = &ChunkSummary> {
        self.summaries.iter().filter(|s| s.is_success())
    }

    /// Number of successful summaries.
    #[must_use]
    pub fn succeeded_count(&self) -> usize {
        self.succeeded().count()
    }

    /// Total number of chunks.
    #[must_use]
    pub fn total(&self) -> usize {
        self.summaries.len()
    }
}
