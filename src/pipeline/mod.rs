//! Chunked document pipeline.
//!
//! A document that does not fit the model's context is split by the
//! [`crate::chunking::DocumentChunker`], summarized part by part by the
//! [`ChunkProcessor`], and answered once by the [`SynthesisEngine`].
//! Chunks are processed strictly one after another against the single
//! shared runtime.

pub mod processor;
pub mod progress;
pub mod prompts;
pub mod synthesis;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::SamplingParams;

pub use processor::{ChunkProcessor, ChunkState, MAX_RETRIES, check_coverage};
pub use progress::{ChunkProgress, NoopProgress, ProgressSink, ProgressUpdate, TracingProgress};
pub use synthesis::{SynthesisConfig, SynthesisEngine, select_evenly};

/// Default ceiling on a chunk prompt, in characters.
///
/// Sized for the largest chunk plus prompt text and instruction.
pub const DEFAULT_CHUNK_PROMPT_CHARS: usize = 6000;

/// Default cache retention for processed documents, in seconds.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// Pipeline settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Ceiling on each chunk prompt, in characters.
    pub chunk_prompt_chars: usize,
    /// Pause after a context reset before the retry, in milliseconds.
    pub settle_delay_ms: u64,
    /// Sampling for chunk summaries.
    pub chunk_sampling: SamplingParams,
    /// Final answer settings.
    pub synthesis: SynthesisConfig,
    /// How long a processed document answers follow-ups, in seconds.
    pub cache_ttl_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_prompt_chars: DEFAULT_CHUNK_PROMPT_CHARS,
            settle_delay_ms: 200,
            chunk_sampling: SamplingParams {
                max_tokens: 256,
                temperature: 0.3,
                top_p: 0.9,
            },
            synthesis: SynthesisConfig::default(),
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
        }
    }
}

impl PipelineConfig {
    /// Delay between a context reset and the retry.
    #[must_use]
    pub const fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Cache retention.
    #[must_use]
    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}
