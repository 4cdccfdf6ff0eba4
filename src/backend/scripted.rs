//! Deterministic in-process engine.
//!
//! Replies come from a responder closure, so tests can script exact
//! failures (fail chunk 3 once, stall until cancelled, exhaust memory)
//! and inspect how many loads, contexts, and generations happened.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::{InferenceBackend, InferenceContext, LoadedModel, SamplingParams};
use crate::error::BackendError;
use crate::runtime::{FinishReason, TokenSink};

/// One generation request as seen by the responder.
#[derive(Debug, Clone)]
pub struct ScriptedCall {
    /// Model the context belongs to.
    pub model_id: String,
    /// Fully templated prompt.
    pub prompt: String,
    /// 0-based count of generations started on this backend.
    pub sequence: usize,
}

/// What the engine does for one call.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Stream this text, split into word-sized pieces.
    Text(String),
    /// Fail with this error before emitting anything.
    Fail(BackendError),
    /// Emit nothing until cancelled.
    Stall,
    /// Emit nothing and ignore cancellation, like a wedged engine call.
    Hang,
    /// Stream this text, then report that the engine stopped early.
    Interrupted(String),
}

type Responder = dyn Fn(&ScriptedCall) -> ScriptedReply + Send + Sync;

/// Counters observed by tests.
#[derive(Debug, Default)]
pub struct ScriptedStats {
    loads: AtomicUsize,
    model_drops: AtomicUsize,
    contexts_created: AtomicUsize,
    contexts_dropped: AtomicUsize,
    generations: AtomicUsize,
}

impl ScriptedStats {
    /// Successful weight loads.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Loaded models released.
    pub fn model_drops(&self) -> usize {
        self.model_drops.load(Ordering::SeqCst)
    }

    /// Contexts created.
    pub fn contexts_created(&self) -> usize {
        self.contexts_created.load(Ordering::SeqCst)
    }

    /// Contexts released.
    pub fn contexts_dropped(&self) -> usize {
        self.contexts_dropped.load(Ordering::SeqCst)
    }

    /// Generations started.
    pub fn generations(&self) -> usize {
        self.generations.load(Ordering::SeqCst)
    }

    /// Models currently resident.
    pub fn resident_models(&self) -> usize {
        self.loads().saturating_sub(self.model_drops())
    }
}

struct Shared {
    responder: Box<Responder>,
    stats: Arc<ScriptedStats>,
    missing: HashSet<String>,
    load_delay: Duration,
    token_delay: Duration,
    failing_contexts: AtomicUsize,
}

/// Scripted engine backend.
///
/// # Examples
///
/// ```
/// use local_llm::backend::{ScriptedBackend, ScriptedReply};
///
/// let backend = ScriptedBackend::new(|call| {
///     ScriptedReply::Text(format!("reply {}", call.sequence))
/// });
/// assert_eq!(backend.stats().generations(), 0);
/// ```
#[derive(Clone)]
pub struct ScriptedBackend {
    shared: Arc<Shared>,
}

impl ScriptedBackend {
    /// Creates a backend driven by `responder`.
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&ScriptedCall) -> ScriptedReply + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                responder: Box::new(responder),
                stats: Arc::new(ScriptedStats::default()),
                missing: HashSet::new(),
                load_delay: Duration::ZERO,
                token_delay: Duration::ZERO,
                failing_contexts: AtomicUsize::new(0),
            }),
        }
    }

    /// A backend that answers every call with a short deterministic line.
    #[must_use]
    pub fn echo() -> Self {
        Self::new(|call| {
            ScriptedReply::Text(format!(
                "Scripted reply {} to a {}-character prompt.",
                call.sequence + 1,
                call.prompt.chars().count()
            ))
        })
    }

    fn configure(mut self, f: impl FnOnce(&mut Shared)) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            f(shared);
        }
        self
    }

    /// Delays every load by `delay`.
    #[must_use]
    pub fn with_load_delay(self, delay: Duration) -> Self {
        self.configure(|s| s.load_delay = delay)
    }

    /// Delays every emitted piece by `delay`.
    #[must_use]
    pub fn with_token_delay(self, delay: Duration) -> Self {
        self.configure(|s| s.token_delay = delay)
    }

    /// Makes loading `model_id` fail with [`BackendError::ModelNotFound`].
    #[must_use]
    pub fn with_missing_model(self, model_id: &str) -> Self {
        let model_id = model_id.to_string();
        self.configure(|s| {
            s.missing.insert(model_id);
        })
    }

    /// Makes the next `count` context creations fail.
    pub fn fail_next_contexts(&self, count: usize) {
        self.shared.failing_contexts.store(count, Ordering::SeqCst);
    }

    /// Returns the shared counters.
    #[must_use]
    pub fn stats(&self) -> Arc<ScriptedStats> {
        Arc::clone(&self.shared.stats)
    }
}

impl std::fmt::Debug for ScriptedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedBackend")
            .field("stats", &self.shared.stats)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn load_model(
        &self,
        model_id: &str,
    ) -> std::result::Result<Box<dyn LoadedModel>, BackendError> {
        if !self.shared.load_delay.is_zero() {
            tokio::time::sleep(self.shared.load_delay).await;
        }
        if self.shared.missing.contains(model_id) {
            return Err(BackendError::ModelNotFound(model_id.to_string()));
        }
        self.shared.stats.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedModel {
            shared: Arc::clone(&self.shared),
            model_id: model_id.to_string(),
        }))
    }
}

struct ScriptedModel {
    shared: Arc<Shared>,
    model_id: String,
}

#[async_trait]
impl LoadedModel for ScriptedModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn new_context(&self) -> std::result::Result<Box<dyn InferenceContext>, BackendError> {
        let failing = self
            .shared
            .failing_contexts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(BackendError::Exhausted(
                "scripted context allocation failure".to_string(),
            ));
        }
        self.shared
            .stats
            .contexts_created
            .fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedContext {
            shared: Arc::clone(&self.shared),
            model_id: self.model_id.clone(),
        }))
    }
}

impl Drop for ScriptedModel {
    fn drop(&mut self) {
        self.shared.stats.model_drops.fetch_add(1, Ordering::SeqCst);
    }
}

struct ScriptedContext {
    shared: Arc<Shared>,
    model_id: String,
}

impl Drop for ScriptedContext {
    fn drop(&mut self) {
        self.shared
            .stats
            .contexts_dropped
            .fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl InferenceContext for ScriptedContext {
    async fn generate(
        &mut self,
        prompt: &str,
        sampling: &SamplingParams,
        sink: &mut TokenSink,
    ) -> std::result::Result<FinishReason, BackendError> {
        let sequence = self.shared.stats.generations.fetch_add(1, Ordering::SeqCst);
        let call = ScriptedCall {
            model_id: self.model_id.clone(),
            prompt: prompt.to_string(),
            sequence,
        };

        let (text, finish) = match (self.shared.responder)(&call) {
            ScriptedReply::Text(text) => (text, FinishReason::EndOfOutput),
            ScriptedReply::Interrupted(text) => (text, FinishReason::Cancelled),
            ScriptedReply::Fail(err) => return Err(err),
            ScriptedReply::Stall => {
                sink.cancelled().await;
                return Ok(FinishReason::Cancelled);
            }
            ScriptedReply::Hang => std::future::pending().await,
        };

        let budget = usize::try_from(sampling.max_tokens).unwrap_or(usize::MAX);
        for (emitted, piece) in text.split_inclusive(' ').enumerate() {
            if emitted >= budget {
                return Ok(FinishReason::MaxTokens);
            }
            if !self.shared.token_delay.is_zero() {
                tokio::time::sleep(self.shared.token_delay).await;
            }
            if !sink.send(piece).await {
                return Ok(FinishReason::Cancelled);
            }
        }
        Ok(finish)
    }
}
