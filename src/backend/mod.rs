//! Inference engine backends.
//!
//! An engine is driven in three steps: load weights ([`InferenceBackend`]),
//! create an evaluation context from them ([`LoadedModel`]), and generate
//! tokens in that context ([`InferenceContext`]). The runtime owns the
//! resulting objects and guarantees a context never outlives its model.

pub mod ollama;
pub mod scripted;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{EngineConfig, EngineKind};
use crate::error::{BackendError, Result};
use crate::runtime::{FinishReason, TokenSink};

pub use ollama::OllamaBackend;
pub use scripted::{ScriptedBackend, ScriptedCall, ScriptedReply, ScriptedStats};

/// Sampling parameters sent with each generation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    /// Maximum number of new tokens.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Nucleus sampling threshold.
    pub top_p: f32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.7,
            top_p: 0.9,
        }
    }
}

impl SamplingParams {
    /// Returns a copy with a different token budget.
    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// An inference engine that can load model weights.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Short engine name for logs.
    fn name(&self) -> &'static str;

    /// Loads the weights of `model_id`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::ModelNotFound`] for unknown models and
    /// [`BackendError::Unavailable`] when the engine cannot be reached.
    async fn load_model(&self, model_id: &str) -> std::result::Result<Box<dyn LoadedModel>, BackendError>;
}

/// Loaded weights. Dropping it releases them.
#[async_trait]
pub trait LoadedModel: Send + Sync {
    /// Identifier the weights were loaded from.
    fn model_id(&self) -> &str;

    /// Creates a fresh evaluation context.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the engine cannot allocate the context.
    async fn new_context(&self) -> std::result::Result<Box<dyn InferenceContext>, BackendError>;
}

/// An evaluation context (KV cache). Dropping it releases it.
#[async_trait]
pub trait InferenceContext: Send {
    /// Generates a completion for a fully templated prompt, pushing each
    /// piece into `sink`. Must stop promptly once `sink.send` returns
    /// `false`.
    ///
    /// # Errors
    ///
    /// Returns a backend error if evaluation or sampling fails.
    async fn generate(
        &mut self,
        prompt: &str,
        sampling: &SamplingParams,
        sink: &mut TokenSink,
    ) -> std::result::Result<FinishReason, BackendError>;
}

/// Builds the backend selected by configuration.
///
/// # Errors
///
/// Returns [`crate::Error::Config`] if the HTTP client cannot be built.
pub fn from_config(config: &EngineConfig) -> Result<Arc<dyn InferenceBackend>> {
    match config.kind {
        EngineKind::Ollama => Ok(Arc::new(OllamaBackend::new(
            &config.host,
            config.request_timeout(),
        )?)),
        EngineKind::Scripted => Ok(Arc::new(ScriptedBackend::echo())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampling_defaults() {
        let params = SamplingParams::default();
        assert_eq!(params.max_tokens, 512);
        assert_eq!(params.with_max_tokens(64).max_tokens, 64);
    }

    #[test]
    fn test_sampling_partial_json() {
        let params: SamplingParams = serde_json::from_str(r#"{"temperature": 0.1}"#).unwrap();
        assert!((params.temperature - 0.1).abs() < f32::EPSILON);
        assert_eq!(params.max_tokens, 512);
    }

    #[test]
    fn test_from_config_selects_engine() {
        let config = EngineConfig {
            kind: EngineKind::Scripted,
            ..EngineConfig::default()
        };
        assert_eq!(from_config(&config).unwrap().name(), "scripted");

        let config = EngineConfig::default();
        assert_eq!(from_config(&config).unwrap().name(), "ollama");
    }
}
