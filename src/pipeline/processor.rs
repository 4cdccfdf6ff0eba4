//! Sequential chunk summarization with one retry per chunk.
//!
//! Every chunk walks `Pending -> Processing -> {Succeeded, Failed}`. A
//! failed attempt resets the model context (never the weights), waits a
//! short settle delay and tries once more. A second failure marks the
//! chunk failed and the run moves on; only the coverage check at the end
//! decides whether the document as a whole failed.

use tracing::{debug, info, warn};

use crate::core::{Chunk, ChunkSummary, ProcessedDocument};
use crate::error::{GenerationError, PipelineError};
use crate::generation::{ChatMessage, GenerationStream};
use crate::pipeline::progress::{ChunkProgress, ProgressSink, ProgressUpdate};
use crate::pipeline::{PipelineConfig, prompts};

/// Retries allowed after the first attempt of a chunk.
pub const MAX_RETRIES: u8 = 1;

/// Processing state of one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    /// Not started.
    Pending,
    /// An attempt is running. `attempt` starts at 1.
    Processing {
        /// Current attempt number.
        attempt: u8,
    },
    /// A summary was produced.
    Succeeded {
        /// Attempts used.
        attempts: u8,
    },
    /// Every attempt failed.
    Failed {
        /// Attempts used.
        attempts: u8,
    },
}

impl ChunkState {
    /// Starts the first attempt. Other states are returned unchanged.
    #[must_use]
    pub const fn start(self) -> Self {
        match self {
            Self::Pending => Self::Processing { attempt: 1 },
            other => other,
        }
    }

    /// Records a successful attempt.
    #[must_use]
    pub const fn succeed(self) -> Self {
        match self {
            Self::Processing { attempt } => Self::Succeeded { attempts: attempt },
            other => other,
        }
    }

    /// Records a failed attempt: retries while the budget allows, else fails.
    #[must_use]
    pub const fn fail(self) -> Self {
        match self {
            Self::Processing { attempt } if attempt <= MAX_RETRIES => Self::Processing {
                attempt: attempt + 1,
            },
            Self::Processing { attempt } => Self::Failed { attempts: attempt },
            other => other,
        }
    }

    /// Returns true for `Succeeded` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::Failed { .. })
    }
}

/// Drives the runtime over the chunks of one document, one at a time.
#[derive(Debug, Clone)]
pub struct ChunkProcessor {
    generator: GenerationStream,
    config: PipelineConfig,
    default_model: String,
}

impl ChunkProcessor {
    /// Creates a processor. `default_model` is loaded when a run starts
    /// with no model resident.
    #[must_use]
    pub fn new(
        generator: GenerationStream,
        config: PipelineConfig,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            generator,
            config,
            default_model: default_model.into(),
        }
    }

    /// Returns the settings.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Loads the default model if nothing is loaded.
    ///
    /// # Errors
    ///
    /// Any load error from the runtime.
    pub async fn ensure_model(&self, progress: &dyn ProgressSink) -> Result<(), PipelineError> {
        let runtime = self.generator.runtime();
        if runtime.is_loaded() {
            return Ok(());
        }
        progress.on_progress(&ProgressUpdate::status(format!(
            "Loading model {}",
            self.default_model
        )));
        runtime.load(&self.default_model).await?;
        info!(model = %self.default_model, "model loaded for document processing");
        Ok(())
    }

    /// Summarizes `chunks` in order and checks coverage.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::InsufficientCoverage`] if fewer than half of the
    ///   chunks produced a summary.
    /// - [`GenerationError::PromptTooLong`] if a chunk prompt cannot fit
    ///   the chunk ceiling; no attempt is made in that case.
    /// - Load errors when no model is resident and the default one fails.
    pub async fn process(
        &self,
        document_id: &str,
        chunks: &[Chunk],
        instruction: &str,
        progress: &dyn ProgressSink,
    ) -> Result<ProcessedDocument, PipelineError> {
        self.ensure_model(progress).await?;

        let total = chunks.len();
        let mut summaries = Vec::with_capacity(total);
        info!(document = document_id, chunks = total, "processing document");

        for (finished, chunk) in chunks.iter().enumerate() {
            let summary = self
                .process_chunk(document_id, chunk, total, instruction, finished, progress)
                .await?;
            summaries.push(summary);
        }

        let document = ProcessedDocument::new(document_id, summaries);
        check_coverage(&document)?;
        info!(
            document = document_id,
            succeeded = document.succeeded_count(),
            total,
            "document processed"
        );
        Ok(document)
    }

    async fn process_chunk(
        &self,
        document_id: &str,
        chunk: &Chunk,
        total: usize,
        instruction: &str,
        finished: usize,
        progress: &dyn ProgressSink,
    ) -> Result<ChunkSummary, PipelineError> {
        let part = chunk.number();
        let messages = vec![
            ChatMessage::system(prompts::CHUNK_SYSTEM_PROMPT),
            ChatMessage::user(prompts::chunk_prompt(document_id, instruction, chunk, total)),
        ];

        let mut state = ChunkState::Pending.start();
        let mut output = String::new();

        while let ChunkState::Processing { attempt } = state {
            progress.on_progress(&ProgressUpdate::chunk(
                if attempt == 1 {
                    format!("Summarizing part {part} of {total}")
                } else {
                    format!("Retrying part {part} of {total}")
                },
                ChunkProgress::new(chunk.index(), finished, total),
            ));
            debug!(chunk = chunk.index(), attempt, "chunk attempt started");

            match self.attempt(messages.clone()).await {
                Ok(text) => {
                    output = text;
                    state = state.succeed();
                }
                Err(PipelineError::Generation(err @ GenerationError::PromptTooLong { .. })) => {
                    return Err(err.into());
                }
                Err(err) => {
                    let failure = PipelineError::ChunkFailed {
                        index: chunk.index(),
                        reason: err.to_string(),
                    };
                    warn!(attempt, error = %failure, "chunk attempt failed");
                    output = err.to_string();
                    state = state.fail();
                    if matches!(state, ChunkState::Processing { .. }) {
                        self.prepare_retry().await;
                    }
                }
            }
        }

        let done = ChunkProgress::new(chunk.index(), finished + 1, total);
        let summary = match state {
            ChunkState::Succeeded { attempts } => {
                progress.on_progress(&ProgressUpdate::chunk(
                    format!("Summarized part {part} of {total}"),
                    done,
                ));
                ChunkSummary::succeeded(chunk.index(), output, attempts)
            }
            ChunkState::Failed { attempts } => {
                progress.on_progress(&ProgressUpdate::chunk(
                    format!("Part {part} of {total} could not be summarized"),
                    done,
                ));
                ChunkSummary::failed(chunk.index(), output, attempts)
            }
            ChunkState::Pending | ChunkState::Processing { .. } => {
                ChunkSummary::failed(chunk.index(), output, 0)
            }
        };
        Ok(summary)
    }

    async fn attempt(&self, messages: Vec<ChatMessage>) -> Result<String, PipelineError> {
        let text = self
            .generator
            .complete(
                messages,
                self.config.chunk_prompt_chars,
                self.config.chunk_sampling,
                |_| {},
            )
            .await?;

        let text = text.trim();
        if text.is_empty() {
            return Err(PipelineError::GenerationFailed {
                reason: "empty summary".to_string(),
            });
        }
        Ok(text.to_string())
    }

    async fn prepare_retry(&self) {
        if let Err(err) = self.generator.runtime().reset_context().await {
            warn!(error = %err, "context reset before retry failed");
        }
        let delay = self.config.settle_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Fails when fewer than half of the chunks succeeded.
///
/// # Errors
///
/// [`PipelineError::InsufficientCoverage`].
pub fn check_coverage(document: &ProcessedDocument) -> Result<(), PipelineError> {
    let succeeded = document.succeeded_count();
    let total = document.total();
    if total == 0 || succeeded * 2 < total {
        return Err(PipelineError::InsufficientCoverage { succeeded, total });
    }
    Ok(())
}
