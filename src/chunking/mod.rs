//! Document chunking.
//!
//! Splits text that exceeds a model's context window into ordered,
//! bounded chunks. The window size starts from a base size and is scaled
//! by two factors:
//!
//! - **Model profile**: smaller models get larger chunks ([`ModelProfile`])
//! - **Content density**: denser text gets smaller chunks ([`ContentDensity`])
//!
//! The result is clamped to `[min, max]`.

pub mod chunker;
pub mod density;
pub mod profile;

pub use chunker::{ChunkPlan, ChunkSizing, DocumentChunker};
pub use density::ContentDensity;
pub use profile::ModelProfile;

/// Default base chunk size in characters (~500 tokens at 4 chars/token).
pub const DEFAULT_BASE_CHUNK_SIZE: usize = 2000;

/// Default lower bound on chunk size.
pub const DEFAULT_MIN_CHUNK_SIZE: usize = 500;

/// Default upper bound on chunk size.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 4000;
