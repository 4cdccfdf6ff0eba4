//! Core domain models.
//!
//! Pure data: documents, their chunks, and per-chunk summaries. Nothing
//! here talks to a model.

pub mod chunk;
pub mod document;
pub mod summary;

pub use chunk::Chunk;
pub use document::FileContent;
pub use summary::{ChunkOutcome, ChunkSummary, ProcessedDocument};
