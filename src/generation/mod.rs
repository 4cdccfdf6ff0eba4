//! Prompt building and generation on top of the model runtime.
//!
//! [`GenerationStream`] turns an instruction plus chat history into one
//! templated prompt, checks it against the ceiling, and hands it to the
//! [`ModelRuntime`]. Validation happens before any runtime guard is
//! touched, so rejected input never contends with other work.

pub mod request;
pub mod template;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backend::SamplingParams;
use crate::error::GenerationError;
use crate::io::{sanitize_prompt_text, truncate_graphemes};
use crate::runtime::{FinishReason, ModelRuntime, TokenStream};

pub use request::{DEFAULT_MAX_PROMPT_CHARS, GenerationRequest, HistoryWindow, RenderedPrompt};
pub use template::{ChatMessage, ChatTemplate, Role};

/// Default system prompt for chat.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant running locally on this device. \
Answer clearly and concisely. If you are unsure, say so.";

/// Chat prompt settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Prompt format.
    pub template: ChatTemplate,
    /// System message prepended to every chat.
    pub system_prompt: String,
    /// Hard ceiling on the rendered chat prompt, in characters.
    pub max_prompt_chars: usize,
    /// Explicit instruction truncation, in characters. Off when `None`.
    pub max_instruction_chars: Option<usize>,
    /// History limits.
    pub history: HistoryWindow,
    /// Sampling for chat replies.
    pub sampling: SamplingParams,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            template: ChatTemplate::default(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_prompt_chars: DEFAULT_MAX_PROMPT_CHARS,
            max_instruction_chars: None,
            history: HistoryWindow::default(),
            sampling: SamplingParams::default(),
        }
    }
}

/// Builds prompts and streams generations from a shared runtime.
#[derive(Debug, Clone)]
pub struct GenerationStream {
    runtime: Arc<ModelRuntime>,
    config: GenerationConfig,
}

impl GenerationStream {
    /// Creates a generator over `runtime`.
    #[must_use]
    pub const fn new(runtime: Arc<ModelRuntime>, config: GenerationConfig) -> Self {
        Self { runtime, config }
    }

    /// Returns the runtime.
    #[must_use]
    pub const fn runtime(&self) -> &Arc<ModelRuntime> {
        &self.runtime
    }

    /// Returns the prompt settings.
    #[must_use]
    pub const fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Builds the chat prompt for `instruction` after `history`.
    ///
    /// # Errors
    ///
    /// - [`GenerationError::EmptyInput`] for an empty or whitespace-only instruction.
    /// - [`GenerationError::PromptTooLong`] if the assembled prompt exceeds the ceiling.
    pub fn build_chat_prompt(
        &self,
        instruction: &str,
        history: &[ChatMessage],
    ) -> Result<RenderedPrompt, GenerationError> {
        let instruction = sanitize_prompt_text(instruction);
        if instruction.trim().is_empty() {
            return Err(GenerationError::EmptyInput);
        }

        let instruction = match self.config.max_instruction_chars {
            Some(limit) if instruction.chars().count() > limit => {
                let truncated = truncate_graphemes(&instruction, limit).to_string();
                warn!(
                    original_chars = instruction.chars().count(),
                    kept_chars = truncated.chars().count(),
                    "instruction truncated"
                );
                truncated
            }
            _ => instruction,
        };

        let mut messages = Vec::with_capacity(history.len() + 2);
        if !self.config.system_prompt.trim().is_empty() {
            messages.push(ChatMessage::system(&self.config.system_prompt));
        }
        messages.extend(
            self.config
                .history
                .apply(history)
                .into_iter()
                .filter(|m| m.role != Role::System)
                .map(|m| ChatMessage::new(m.role, sanitize_prompt_text(&m.content))),
        );
        messages.push(ChatMessage::user(instruction));

        let prompt = GenerationRequest::new(messages, self.config.max_prompt_chars)
            .render(self.config.template)?;
        debug!(
            prompt_chars = prompt.char_len(),
            history = history.len(),
            "built chat prompt"
        );
        Ok(prompt)
    }

    /// Starts a streaming chat reply.
    ///
    /// # Errors
    ///
    /// Prompt errors from [`Self::build_chat_prompt`], then runtime
    /// admission errors ([`crate::error::RuntimeError::ResourceBusy`],
    /// [`crate::error::RuntimeError::NotLoaded`]).
    pub fn chat(
        &self,
        instruction: &str,
        history: &[ChatMessage],
    ) -> Result<TokenStream, GenerationError> {
        let prompt = self.build_chat_prompt(instruction, history)?;
        Ok(self.runtime.generate(prompt, self.config.sampling)?)
    }

    /// Runs one bounded, non-streaming generation for a prepared
    /// conversation, checked against `max_prompt_chars`.
    ///
    /// # Errors
    ///
    /// [`GenerationError::PromptTooLong`] before any runtime call, then
    /// any runtime error including timeout, and
    /// [`GenerationError::Cancelled`] if the generation was cancelled
    /// before it finished.
    pub async fn complete<F>(
        &self,
        messages: Vec<ChatMessage>,
        max_prompt_chars: usize,
        sampling: SamplingParams,
        on_token: F,
    ) -> Result<String, GenerationError>
    where
        F: FnMut(&str) + Send,
    {
        let prompt = GenerationRequest::new(messages, max_prompt_chars).render(self.config.template)?;
        let (text, reason) = self.runtime.generate_text(prompt, sampling, on_token).await?;
        if reason == FinishReason::Cancelled {
            return Err(GenerationError::Cancelled);
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ScriptedBackend, ScriptedReply};
    use crate::error::RuntimeError;
    use crate::runtime::{GuardKind, RuntimeConfig};
    use futures_util::StreamExt;

    fn generator(backend: ScriptedBackend, config: GenerationConfig) -> GenerationStream {
        let runtime = Arc::new(ModelRuntime::new(Arc::new(backend), RuntimeConfig::default()));
        GenerationStream::new(runtime, config)
    }

    #[test]
    fn test_empty_instruction_rejected() {
        let generator = generator(ScriptedBackend::echo(), GenerationConfig::default());
        for input in ["", "   ", "\n\t", "\0"] {
            assert!(matches!(
                generator.build_chat_prompt(input, &[]),
                Err(GenerationError::EmptyInput)
            ));
        }
        assert!(!generator.runtime().guards().is_held(GuardKind::Generation));
    }

    #[test]
    fn test_prompt_includes_system_history_and_instruction() {
        let generator = generator(ScriptedBackend::echo(), GenerationConfig::default());
        let history = vec![ChatMessage::user("Hi"), ChatMessage::assistant("Hello!")];
        let prompt = generator.build_chat_prompt("What now?", &history).unwrap();

        let text = prompt.as_str();
        assert!(text.starts_with("System: You are a helpful assistant"));
        assert!(text.contains("User: Hi\nAssistant: Hello!\nUser: What now?\nAssistant:"));
    }

    #[test]
    fn test_prompt_sanitized() {
        let config = GenerationConfig {
            system_prompt: String::new(),
            ..GenerationConfig::default()
        };
        let generator = generator(ScriptedBackend::echo(), config);
        let prompt = generator.build_chat_prompt("a\0b\u{1b}c", &[]).unwrap();
        assert_eq!(prompt.as_str(), "User: abc\nAssistant:");
    }

    #[test]
    fn test_prompt_too_long_is_not_truncated() {
        let config = GenerationConfig {
            max_prompt_chars: 100,
            ..GenerationConfig::default()
        };
        let generator = generator(ScriptedBackend::echo(), config);
        assert!(matches!(
            generator.build_chat_prompt(&"x".repeat(200), &[]),
            Err(GenerationError::PromptTooLong { limit: 100, .. })
        ));
    }

    #[test]
    fn test_explicit_instruction_truncation() {
        let config = GenerationConfig {
            system_prompt: String::new(),
            max_instruction_chars: Some(5),
            ..GenerationConfig::default()
        };
        let generator = generator(ScriptedBackend::echo(), config);
        let prompt = generator.build_chat_prompt("abcdefghij", &[]).unwrap();
        assert_eq!(prompt.as_str(), "User: abcde\nAssistant:");
    }

    #[tokio::test]
    async fn test_chat_streams_tokens() {
        let backend = ScriptedBackend::new(|_| ScriptedReply::Text("one two".to_string()));
        let generator = generator(backend, GenerationConfig::default());
        generator.runtime().load("m").await.unwrap();

        let stream = generator.chat("hello", &[]).unwrap();
        let pieces: Vec<String> = stream.collect().await;
        assert_eq!(pieces, vec!["one ", "two"]);
    }

    #[tokio::test]
    async fn test_chat_without_model() {
        let generator = generator(ScriptedBackend::echo(), GenerationConfig::default());
        assert!(matches!(
            generator.chat("hello", &[]),
            Err(GenerationError::Runtime(RuntimeError::NotLoaded))
        ));
    }

    #[tokio::test]
    async fn test_complete_rejects_before_runtime() {
        let backend = ScriptedBackend::echo();
        let stats = backend.stats();
        let generator = generator(backend, GenerationConfig::default());
        generator.runtime().load("m").await.unwrap();

        let err = generator
            .complete(
                vec![ChatMessage::user("x".repeat(500))],
                100,
                SamplingParams::default(),
                |_| {},
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::PromptTooLong { .. }));
        assert_eq!(stats.generations(), 0);
    }

    #[tokio::test]
    async fn test_complete_reports_interrupted_generation() {
        let backend =
            ScriptedBackend::new(|_| ScriptedReply::Interrupted("half an".to_string()));
        let generator = generator(backend, GenerationConfig::default());
        generator.runtime().load("m").await.unwrap();

        let err = generator
            .complete(
                vec![ChatMessage::user("go")],
                1000,
                SamplingParams::default(),
                |_| {},
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Cancelled));
        assert!(!generator.runtime().guards().is_held(GuardKind::Generation));
    }
}
