//! Model runtime.
//!
//! [`ModelRuntime`] exclusively owns the loaded model and its evaluation
//! context and serialises everything that touches them:
//!
//! - **Lifecycle** operations (load, unload, context reset) are admitted
//!   one at a time and bounded by the load timeout.
//! - **Generation** is admitted one at a time, runs on its own task, and
//!   streams tokens through a [`TokenStream`].
//! - A watchdog clears guards held beyond the stale threshold and tears
//!   down the operation that held them, releasing the model slot.
//!
//! The native resources sit in a single model handle that is never
//! exposed; replacing or dropping it is the only way resources are
//! released, so a double free cannot be expressed.

pub mod guard;
pub mod stream;

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedMutexGuard, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{InferenceBackend, InferenceContext, LoadedModel, SamplingParams};
use crate::error::RuntimeError;
use crate::generation::RenderedPrompt;

pub use guard::{GuardKind, GuardPermit, RuntimeGuards};
pub use stream::{FinishReason, TokenSink, TokenStream};

/// Runtime limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Upper bound on a model load, in seconds.
    pub load_timeout_secs: u64,
    /// Upper bound on a full non-streaming generation, in seconds.
    pub generation_timeout_secs: u64,
    /// Guards held longer than this are cleared by the watchdog, in seconds.
    pub stale_guard_secs: u64,
    /// How often the watchdog runs, in seconds.
    pub watchdog_interval_secs: u64,
    /// Generations per context before it is recreated.
    ///
    /// The counter reaches the threshold after that many generations; the
    /// next generation recreates the context first and counts as turn 1
    /// of the new context, so the counter reads 1 (not 0) afterwards.
    pub turn_threshold: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            load_timeout_secs: 30,
            generation_timeout_secs: 60,
            stale_guard_secs: 300,
            watchdog_interval_secs: 30,
            turn_threshold: 50,
        }
    }
}

impl RuntimeConfig {
    /// Load timeout.
    #[must_use]
    pub const fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_secs)
    }

    /// Non-streaming generation timeout.
    #[must_use]
    pub const fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    /// Stale guard threshold.
    #[must_use]
    pub const fn stale_guard_after(&self) -> Duration {
        Duration::from_secs(self.stale_guard_secs)
    }

    /// Watchdog period.
    #[must_use]
    pub const fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs)
    }
}

/// Turn counter and identity of the loaded model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationState {
    model_id: Option<String>,
    turns: u32,
    threshold: u32,
}

impl ConversationState {
    fn new(threshold: u32) -> Self {
        Self {
            model_id: None,
            turns: 0,
            threshold: threshold.max(1),
        }
    }

    /// Starts a fresh conversation for `model_id` (or none).
    fn reset(&mut self, model_id: Option<String>) {
        self.model_id = model_id;
        self.turns = 0;
    }

    /// Counts one generation. Returns true when the threshold was reached
    /// and the context must be recreated first; the counter restarts.
    fn begin_turn(&mut self) -> bool {
        let recreate = self.turns >= self.threshold;
        if recreate {
            self.turns = 0;
        }
        self.turns += 1;
        recreate
    }

    /// Loaded model identifier.
    #[must_use]
    pub fn model_id(&self) -> Option<&str> {
        self.model_id.as_deref()
    }

    /// Generations since the context was created.
    #[must_use]
    pub const fn turns(&self) -> u32 {
        self.turns
    }
}

/// The loaded model and its context.
///
/// Field order matters: the context is declared first so it is always
/// dropped before the weights it was created from.
pub(crate) struct ModelHandle {
    context: Option<Box<dyn InferenceContext>>,
    model: Box<dyn LoadedModel>,
}

impl ModelHandle {
    fn model_id(&self) -> &str {
        self.model.model_id()
    }

    async fn recreate_context(&mut self) -> Result<(), RuntimeError> {
        self.context = None;
        let context = self
            .model
            .new_context()
            .await
            .map_err(RuntimeError::ContextCreationFailed)?;
        self.context = Some(context);
        Ok(())
    }
}

impl Drop for ModelHandle {
    fn drop(&mut self) {
        self.context.take();
        debug!(model = self.model.model_id(), "released model resources");
    }
}

type Slot = Arc<tokio::sync::Mutex<Option<ModelHandle>>>;

fn lock_state(state: &Mutex<ConversationState>) -> MutexGuard<'_, ConversationState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owner of the single loaded model.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use local_llm::backend::ScriptedBackend;
/// use local_llm::generation::{ChatMessage, ChatTemplate, GenerationRequest};
/// use local_llm::runtime::{ModelRuntime, RuntimeConfig};
///
/// # async fn run() -> local_llm::Result<()> {
/// let runtime = ModelRuntime::new(Arc::new(ScriptedBackend::echo()), RuntimeConfig::default());
/// runtime.load("llama3.2:1b").await?;
///
/// let prompt = GenerationRequest::new(vec![ChatMessage::user("Hello")], 4096)
///     .render(ChatTemplate::Plain)?;
/// let (text, _reason) = runtime
///     .generate_text(prompt, Default::default(), |_| {})
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct ModelRuntime {
    backend: Arc<dyn InferenceBackend>,
    config: RuntimeConfig,
    guards: Arc<RuntimeGuards>,
    slot: Slot,
    conversation: Arc<Mutex<ConversationState>>,
}

impl std::fmt::Debug for ModelRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRuntime")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .field("conversation", &*lock_state(&self.conversation))
            .finish_non_exhaustive()
    }
}

impl ModelRuntime {
    /// Creates a runtime with nothing loaded.
    #[must_use]
    pub fn new(backend: Arc<dyn InferenceBackend>, config: RuntimeConfig) -> Self {
        let conversation = ConversationState::new(config.turn_threshold);
        Self {
            backend,
            config,
            guards: RuntimeGuards::new(),
            slot: Arc::new(tokio::sync::Mutex::new(None)),
            conversation: Arc::new(Mutex::new(conversation)),
        }
    }

    /// Returns the runtime limits.
    #[must_use]
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Returns the guard set (for status reporting and tests).
    #[must_use]
    pub fn guards(&self) -> &RuntimeGuards {
        &self.guards
    }

    /// Returns true when a model is loaded.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        lock_state(&self.conversation).model_id.is_some()
    }

    /// Returns the loaded model identifier.
    #[must_use]
    pub fn current_model(&self) -> Option<String> {
        lock_state(&self.conversation).model_id.clone()
    }

    /// Returns the number of generations in the current context.
    #[must_use]
    pub fn conversation_turns(&self) -> u32 {
        lock_state(&self.conversation).turns
    }

    fn reset_conversation(&self, model_id: Option<String>) {
        lock_state(&self.conversation).reset(model_id);
    }

    fn lock_slot(&self) -> Result<tokio::sync::MutexGuard<'_, Option<ModelHandle>>, RuntimeError> {
        self.slot.try_lock().map_err(|_| RuntimeError::ResourceBusy)
    }

    /// Loads `model_id`, releasing any previously loaded model first.
    ///
    /// Loading the model that is already loaded keeps the weights and
    /// starts a fresh conversation instead.
    ///
    /// # Errors
    ///
    /// - [`RuntimeError::AlreadyInProgress`] if another load or unload runs.
    /// - [`RuntimeError::ResourceBusy`] if a generation runs.
    /// - [`RuntimeError::Timeout`] if loading exceeds the load timeout.
    /// - [`RuntimeError::LoadFailed`] / [`RuntimeError::ContextCreationFailed`]
    ///   if the engine fails.
    pub async fn load(&self, model_id: &str) -> Result<(), RuntimeError> {
        let permit = self.guards.try_acquire(GuardKind::Lifecycle)?;
        let limit = self.config.load_timeout();
        let work = unless_evicted(
            &permit,
            "model load",
            self.config.stale_guard_after(),
            self.load_locked(model_id),
        );

        if let Ok(result) = timeout(limit, work).await {
            result
        } else {
            warn!(model = model_id, ?limit, "model load timed out");
            Err(RuntimeError::Timeout {
                operation: "model load",
                limit,
            })
        }
    }

    async fn load_locked(&self, model_id: &str) -> Result<(), RuntimeError> {
        let mut slot = self.lock_slot()?;

        if let Some(handle) = slot.as_mut()
            && handle.model_id() == model_id
        {
            handle.recreate_context().await?;
            self.reset_conversation(Some(model_id.to_string()));
            info!(model = model_id, "model already loaded, started new conversation");
            return Ok(());
        }

        if let Some(previous) = slot.take() {
            info!(model = previous.model_id(), "unloading previous model");
            self.reset_conversation(None);
            drop(previous);
        }

        info!(model = model_id, backend = self.backend.name(), "loading model");
        let model = self
            .backend
            .load_model(model_id)
            .await
            .map_err(|source| RuntimeError::LoadFailed {
                model_id: model_id.to_string(),
                source,
            })?;

        let mut handle = ModelHandle {
            context: None,
            model,
        };
        handle.recreate_context().await?;

        *slot = Some(handle);
        self.reset_conversation(Some(model_id.to_string()));
        info!(model = model_id, "model loaded");
        Ok(())
    }

    /// Releases the loaded model. A no-op when nothing is loaded.
    ///
    /// # Errors
    ///
    /// - [`RuntimeError::AlreadyInProgress`] if another load or unload runs.
    /// - [`RuntimeError::ResourceBusy`] if a generation runs.
    pub async fn unload(&self) -> Result<(), RuntimeError> {
        let _permit = self.guards.try_acquire(GuardKind::Lifecycle)?;
        let mut slot = self.lock_slot()?;

        if let Some(handle) = slot.take() {
            info!(model = handle.model_id(), "unloading model");
            drop(handle);
        }
        self.reset_conversation(None);
        Ok(())
    }

    /// Recreates the evaluation context without reloading weights.
    ///
    /// # Errors
    ///
    /// - [`RuntimeError::NotLoaded`] if nothing is loaded.
    /// - [`RuntimeError::ResourceBusy`] / [`RuntimeError::AlreadyInProgress`]
    ///   if another operation runs.
    /// - [`RuntimeError::ContextCreationFailed`] if the engine fails.
    pub async fn reset_context(&self) -> Result<(), RuntimeError> {
        let permit = self.guards.try_acquire(GuardKind::Lifecycle)?;
        let limit = self.config.load_timeout();

        let reset = async {
            let mut slot = self.lock_slot()?;
            let handle = slot.as_mut().ok_or(RuntimeError::NotLoaded)?;
            handle.recreate_context().await?;
            let model_id = handle.model_id().to_string();
            self.reset_conversation(Some(model_id.clone()));
            debug!(model = %model_id, "context reset");
            Ok::<(), RuntimeError>(())
        };

        let reset = unless_evicted(
            &permit,
            "context reset",
            self.config.stale_guard_after(),
            reset,
        );
        timeout(limit, reset)
            .await
            .unwrap_or(Err(RuntimeError::Timeout {
                operation: "context reset",
                limit,
            }))
    }

    /// Starts a streaming generation for an already rendered prompt.
    ///
    /// Must be called from within a Tokio runtime. The returned stream
    /// holds the generation guard until it ends, is cancelled, is
    /// dropped, or is evicted by the watchdog (then [`TokenStream::finish`]
    /// reports [`RuntimeError::Timeout`]).
    ///
    /// # Errors
    ///
    /// - [`RuntimeError::ResourceBusy`] if a generation or model operation runs.
    /// - [`RuntimeError::NotLoaded`] if nothing is loaded.
    pub fn generate(
        &self,
        prompt: RenderedPrompt,
        sampling: SamplingParams,
    ) -> Result<TokenStream, RuntimeError> {
        let permit = self.guards.try_acquire(GuardKind::Generation)?;
        let slot = Arc::clone(&self.slot)
            .try_lock_owned()
            .map_err(|_| RuntimeError::ResourceBusy)?;
        if slot.is_none() {
            return Err(RuntimeError::NotLoaded);
        }

        let (tx, rx) = mpsc::channel(stream::TOKEN_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let sink = TokenSink::new(tx, cancel.clone());
        let conversation = Arc::clone(&self.conversation);

        let stale_after = self.config.stale_guard_after();

        let task = tokio::spawn(async move {
            let work = run_generation(slot, conversation, prompt, sampling, sink);
            unless_evicted(&permit, "generation", stale_after, work).await
        });
        Ok(TokenStream::new(rx, cancel, task))
    }

    /// Generates a full completion, bounded by the generation timeout.
    ///
    /// `on_token` sees each piece as it arrives. Returns the text and why
    /// generation stopped. On timeout the generation is aborted and its
    /// guards released before returning.
    ///
    /// # Errors
    ///
    /// Any error from [`Self::generate`], [`RuntimeError::Timeout`], or the
    /// engine's generation failure.
    pub async fn generate_text<F>(
        &self,
        prompt: RenderedPrompt,
        sampling: SamplingParams,
        mut on_token: F,
    ) -> Result<(String, FinishReason), RuntimeError>
    where
        F: FnMut(&str) + Send,
    {
        let mut stream = self.generate(prompt, sampling)?;
        let limit = self.config.generation_timeout();

        let outcome = timeout(limit, async {
            let mut text = String::new();
            while let Some(piece) = stream.next().await {
                on_token(&piece);
                text.push_str(&piece);
            }
            stream.join().await.map(|reason| (text, reason))
        })
        .await;

        match outcome {
            Ok(Ok((text, reason))) => {
                debug!(?reason, chars = text.len(), "generation finished");
                Ok((text, reason))
            }
            Ok(Err(err)) => Err(err),
            Err(_) => {
                warn!(?limit, "generation timed out, aborting");
                stream.abort();
                let _ = stream.join().await;
                Err(RuntimeError::Timeout {
                    operation: "generation",
                    limit,
                })
            }
        }
    }

    /// Clears guards held beyond the stale threshold and evicts the
    /// operations holding them.
    ///
    /// Returns the number of guards cleared.
    pub fn reap_stale_guards(&self) -> usize {
        self.guards.clear_stale(self.config.stale_guard_after())
    }

    /// Spawns the stale-guard watchdog; it stops when `cancel` fires.
    #[must_use]
    pub fn spawn_watchdog(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let guards = Arc::clone(&self.guards);
        let threshold = self.config.stale_guard_after();
        let period = self.config.watchdog_interval().max(Duration::from_millis(10));

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!("guard watchdog stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let cleared = guards.clear_stale(threshold);
                        if cleared > 0 {
                            warn!(cleared, "watchdog cleared stale guards");
                        }
                    }
                }
            }
        })
    }
}

/// Runs `work` until it finishes or the watchdog evicts `permit`.
///
/// Eviction drops `work` and everything it owns, including a held model
/// slot, and reports a timeout for `operation`.
async fn unless_evicted<T, F>(
    permit: &GuardPermit,
    operation: &'static str,
    limit: Duration,
    work: F,
) -> Result<T, RuntimeError>
where
    F: Future<Output = Result<T, RuntimeError>>,
{
    tokio::select! {
        biased;
        result = work => result,
        () = permit.evicted() => {
            warn!(operation, ?limit, "operation evicted by guard watchdog");
            Err(RuntimeError::Timeout { operation, limit })
        }
    }
}

async fn run_generation(
    mut slot: OwnedMutexGuard<Option<ModelHandle>>,
    conversation: Arc<Mutex<ConversationState>>,
    prompt: RenderedPrompt,
    sampling: SamplingParams,
    mut sink: TokenSink,
) -> Result<FinishReason, RuntimeError> {
    let handle = slot.as_mut().ok_or(RuntimeError::NotLoaded)?;

    let (recreate, turn) = {
        let mut state = lock_state(&conversation);
        let recreate = state.begin_turn();
        (recreate, state.turns)
    };
    if recreate {
        info!(model = handle.model_id(), "turn threshold reached, recreating context");
    }
    if recreate || handle.context.is_none() {
        handle.recreate_context().await?;
    }

    let context = handle
        .context
        .as_mut()
        .ok_or_else(|| RuntimeError::GenerationFailed("context unavailable".to_string()))?;

    debug!(turn, prompt_chars = prompt.char_len(), "generation started");
    let reason = context
        .generate(prompt.as_str(), &sampling, &mut sink)
        .await
        .map_err(RuntimeError::from_generation)?;
    debug!(?reason, tokens = sink.emitted(), "generation ended");
    Ok(reason)
}
