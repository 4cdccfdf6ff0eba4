//! The assembled assistant: chat, document processing and follow-ups.
//!
//! [`Assistant`] owns one [`ModelRuntime`] and every component that
//! drives it. It is built explicitly with [`Assistant::init`] and torn
//! down with [`Assistant::shutdown`]; there is no global instance.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::backend::InferenceBackend;
use crate::cache::ResultCache;
use crate::chunking::{ChunkPlan, DocumentChunker, ModelProfile};
use crate::config::Config;
use crate::core::FileContent;
use crate::error::{ChunkingError, GenerationError, Result};
use crate::generation::{ChatMessage, GenerationStream};
use crate::pipeline::{ChunkProcessor, ProgressSink, ProgressUpdate, SynthesisEngine};
use crate::runtime::{ModelRuntime, TokenStream};

/// Local assistant over one model runtime.
#[derive(Debug)]
pub struct Assistant {
    config: Config,
    runtime: Arc<ModelRuntime>,
    generator: GenerationStream,
    chunker: DocumentChunker,
    processor: ChunkProcessor,
    synthesis: SynthesisEngine,
    cache: ResultCache,
    shutdown: CancellationToken,
    watchdog: Option<JoinHandle<()>>,
}

impl Assistant {
    /// Builds every component over `backend`.
    ///
    /// The stale-guard watchdog starts when called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` fails validation.
    pub fn init(config: Config, backend: Arc<dyn InferenceBackend>) -> Result<Self> {
        config.validate()?;

        let runtime = Arc::new(ModelRuntime::new(backend, config.runtime.clone()));
        let generator = GenerationStream::new(Arc::clone(&runtime), config.generation.clone());
        let processor = ChunkProcessor::new(
            generator.clone(),
            config.pipeline.clone(),
            config.engine.default_model.clone(),
        );
        let synthesis = SynthesisEngine::new(generator.clone(), config.pipeline.synthesis);
        let cache = ResultCache::new(config.pipeline.cache_ttl());

        let shutdown = CancellationToken::new();
        let watchdog = Handle::try_current()
            .ok()
            .map(|_| runtime.spawn_watchdog(shutdown.child_token()));

        info!(
            engine = %config.engine.kind,
            default_model = %config.engine.default_model,
            "assistant initialized"
        );

        Ok(Self {
            chunker: DocumentChunker::new(config.chunking),
            config,
            runtime,
            generator,
            processor,
            synthesis,
            cache,
            shutdown,
            watchdog,
        })
    }

    /// Effective configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// The shared runtime.
    #[must_use]
    pub const fn runtime(&self) -> &Arc<ModelRuntime> {
        &self.runtime
    }

    /// The follow-up cache.
    #[must_use]
    pub const fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Loads `model_id`.
    ///
    /// # Errors
    ///
    /// Runtime load errors, including busy and timeout.
    pub async fn load_model(&self, model_id: &str) -> Result<()> {
        Ok(self.runtime.load(model_id).await?)
    }

    /// Loads the configured default model unless a model is loaded.
    ///
    /// # Errors
    ///
    /// Runtime load errors.
    pub async fn ensure_model(&self) -> Result<()> {
        if !self.runtime.is_loaded() {
            self.load_model(&self.config.engine.default_model).await?;
        }
        Ok(())
    }

    /// Unloads the model. Does nothing when none is loaded.
    ///
    /// # Errors
    ///
    /// [`crate::error::RuntimeError::AlreadyInProgress`] or
    /// [`crate::error::RuntimeError::ResourceBusy`] while other work runs.
    pub async fn unload_model(&self) -> Result<()> {
        Ok(self.runtime.unload().await?)
    }

    /// Starts a streaming chat reply.
    ///
    /// # Errors
    ///
    /// [`GenerationError::EmptyInput`] and [`GenerationError::PromptTooLong`]
    /// before the runtime is touched, then runtime admission errors.
    pub fn chat(&self, instruction: &str, history: &[ChatMessage]) -> Result<TokenStream> {
        Ok(self.generator.chat(instruction, history)?)
    }

    /// Chunk plan for `document` under the profile of the loaded model,
    /// or of the default model when none is loaded.
    ///
    /// # Errors
    ///
    /// Chunking errors for invalid sizing.
    pub fn plan(&self, document: &FileContent) -> Result<ChunkPlan> {
        let model = self
            .runtime
            .current_model()
            .unwrap_or_else(|| self.config.engine.default_model.clone());
        self.chunker
            .plan(&document.content, &ModelProfile::for_model(&model))
    }

    /// Splits `document`, summarizes every part, caches the summaries and
    /// synthesizes the answer to `instruction`.
    ///
    /// Summaries of a previously processed document are dropped once the
    /// input is accepted, whether or not this run succeeds.
    ///
    /// # Errors
    ///
    /// - [`GenerationError::EmptyInput`] for an empty instruction.
    /// - [`ChunkingError::EmptyDocument`] for a document without text.
    /// - [`crate::error::PipelineError::InsufficientCoverage`] when fewer
    ///   than half of the parts were summarized.
    /// - Synthesis and runtime errors.
    pub async fn process(
        &self,
        document: &FileContent,
        instruction: &str,
        progress: &dyn ProgressSink,
    ) -> Result<String> {
        if instruction.trim().is_empty() {
            return Err(GenerationError::EmptyInput.into());
        }
        if document.content.trim().is_empty() {
            return Err(ChunkingError::EmptyDocument {
                document: document.file_name.clone(),
            }
            .into());
        }

        self.cache.clear();
        self.processor.ensure_model(progress).await?;
        let plan = self.plan(document)?;
        progress.on_progress(&ProgressUpdate::status(format!(
            "Split {} into {} parts of up to {} characters",
            document.file_name,
            plan.chunks.len(),
            plan.chunk_size
        )));

        let processed = self
            .processor
            .process(&document.file_name, &plan.chunks, instruction, progress)
            .await?;
        self.cache.store(processed.clone());

        Ok(self
            .synthesis
            .synthesize(&processed, instruction, progress)
            .await?)
    }

    /// Returns true while a processed document can answer follow-ups.
    #[must_use]
    pub fn has_processed_data(&self) -> bool {
        self.cache.has_data()
    }

    /// Answers `question` from the cached document.
    ///
    /// # Errors
    ///
    /// [`crate::error::PipelineError::CacheExpired`] when nothing is
    /// cached, then synthesis errors.
    pub async fn answer_follow_up(
        &self,
        question: &str,
        progress: &dyn ProgressSink,
    ) -> Result<String> {
        if question.trim().is_empty() {
            return Err(GenerationError::EmptyInput.into());
        }
        Ok(self.cache.answer(question, &self.synthesis, progress).await?)
    }

    /// Stops the watchdog, clears the cache and unloads the model.
    ///
    /// # Errors
    ///
    /// Unload errors while other work is still running.
    pub async fn shutdown(mut self) -> Result<()> {
        self.shutdown.cancel();
        if let Some(watchdog) = self.watchdog.take() {
            let _ = watchdog.await;
        }
        self.cache.clear();
        self.runtime.unload().await?;
        debug!("assistant shut down");
        Ok(())
    }
}

impl Drop for Assistant {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
