//! Final answer synthesis from chunk summaries.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::SamplingParams;
use crate::core::ProcessedDocument;
use crate::error::{GenerationError, PipelineError};
use crate::generation::{ChatMessage, GenerationRequest, GenerationStream};
use crate::io::truncate_graphemes;
use crate::pipeline::progress::{ProgressSink, ProgressUpdate};
use crate::pipeline::prompts;

/// Bounds on the synthesis prompt.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Ceiling on the synthesis prompt, in characters.
    pub max_prompt_chars: usize,
    /// Starting cap on each summary, in characters.
    pub per_summary_chars: usize,
    /// The per-summary cap is never halved below this.
    pub min_summary_chars: usize,
    /// Most summaries included.
    pub max_summaries: usize,
    /// Sampling for the final answer.
    pub sampling: SamplingParams,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            max_prompt_chars: 4096,
            per_summary_chars: 600,
            min_summary_chars: 80,
            max_summaries: 12,
            sampling: SamplingParams::default().with_max_tokens(768),
        }
    }
}

/// Combines chunk summaries into one answer.
#[derive(Debug, Clone)]
pub struct SynthesisEngine {
    generator: GenerationStream,
    config: SynthesisConfig,
}

impl SynthesisEngine {
    /// Creates an engine.
    #[must_use]
    pub const fn new(generator: GenerationStream, config: SynthesisConfig) -> Self {
        Self { generator, config }
    }

    /// Returns the settings.
    #[must_use]
    pub const fn config(&self) -> &SynthesisConfig {
        &self.config
    }

    /// Builds the bounded synthesis conversation for `document`.
    ///
    /// Keeps at most `max_summaries` succeeded summaries (evenly spaced,
    /// first and last included), truncates each to the per-summary cap,
    /// and halves the cap until the rendered prompt fits.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::InsufficientCoverage`] if nothing succeeded.
    /// - [`GenerationError::PromptTooLong`] if the prompt does not fit even
    ///   at the minimum cap.
    pub fn build_messages(
        &self,
        document: &ProcessedDocument,
        instruction: &str,
    ) -> Result<Vec<ChatMessage>, PipelineError> {
        let succeeded: Vec<&str> = document.succeeded().map(|s| s.text.as_str()).collect();
        if succeeded.is_empty() {
            return Err(PipelineError::InsufficientCoverage {
                succeeded: 0,
                total: document.total(),
            });
        }

        let selected = select_evenly(&succeeded, self.config.max_summaries);
        if selected.len() < succeeded.len() {
            debug!(
                kept = selected.len(),
                available = succeeded.len(),
                "summary count capped"
            );
        }

        let template = self.generator.config().template;
        let floor = self.config.min_summary_chars.max(1);
        let mut cap = self.config.per_summary_chars.max(floor);

        loop {
            let parts: Vec<&str> = selected
                .iter()
                .map(|s| truncate_graphemes(s, cap))
                .collect();
            let messages = vec![
                ChatMessage::system(prompts::SYNTHESIS_SYSTEM_PROMPT),
                ChatMessage::user(prompts::synthesis_prompt(
                    instruction,
                    &parts,
                    document.total(),
                )),
            ];

            let request = GenerationRequest::new(messages, self.config.max_prompt_chars);
            match request.render(template) {
                Ok(_) => {
                    debug!(summaries = parts.len(), cap, "synthesis prompt fits");
                    return Ok(request.messages().to_vec());
                }
                Err(err @ GenerationError::PromptTooLong { .. }) if cap <= floor => {
                    return Err(err.into());
                }
                Err(GenerationError::PromptTooLong { length, .. }) => {
                    let next = (cap / 2).max(floor);
                    debug!(length, cap, next, "synthesis prompt over ceiling, shrinking");
                    cap = next;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Produces the final answer for `document`, streaming tokens to
    /// `progress`.
    ///
    /// # Errors
    ///
    /// Errors from [`Self::build_messages`], runtime errors, and
    /// [`PipelineError::GenerationFailed`] when the answer is empty.
    pub async fn synthesize(
        &self,
        document: &ProcessedDocument,
        instruction: &str,
        progress: &dyn ProgressSink,
    ) -> Result<String, PipelineError> {
        let messages = self.build_messages(document, instruction)?;
        progress.on_progress(&ProgressUpdate::status("Synthesizing final answer"));

        let answer = self
            .generator
            .complete(
                messages,
                self.config.max_prompt_chars,
                self.config.sampling,
                |token| progress.on_token(token),
            )
            .await?;

        let answer = answer.trim();
        if answer.is_empty() {
            warn!(document = %document.document_id, "synthesis produced an empty answer");
            return Err(PipelineError::GenerationFailed {
                reason: "the model returned an empty answer".to_string(),
            });
        }
        info!(
            document = %document.document_id,
            chars = answer.chars().count(),
            "final answer synthesized"
        );
        Ok(answer.to_string())
    }
}

/// Picks at most `max` items, evenly spaced, keeping order and always
/// keeping the first and last.
#[must_use]
pub fn select_evenly<'a>(items: &[&'a str], max: usize) -> Vec<&'a str> {
    if items.len() <= max {
        return items.to_vec();
    }
    match max {
        0 => Vec::new(),
        1 => vec![items[0]],
        _ => {
            let last = items.len() - 1;
            (0..max).map(|i| items[i * last / (max - 1)]).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ScriptedBackend, ScriptedReply};
    use crate::core::ChunkSummary;
    use crate::generation::GenerationConfig;
    use crate::pipeline::progress::NoopProgress;
    use crate::runtime::{ModelRuntime, RuntimeConfig};
    use std::sync::{Arc, Mutex};

    fn engine(backend: ScriptedBackend, config: SynthesisConfig) -> SynthesisEngine {
        let runtime = Arc::new(ModelRuntime::new(Arc::new(backend), RuntimeConfig::default()));
        SynthesisEngine::new(
            GenerationStream::new(runtime, GenerationConfig::default()),
            config,
        )
    }

    fn document(summaries: &[&str]) -> ProcessedDocument {
        ProcessedDocument::new(
            "doc.txt",
            summaries
                .iter()
                .enumerate()
                .map(|(i, s)| ChunkSummary::succeeded(i, *s, 1))
                .collect(),
        )
    }

    #[test]
    fn test_select_evenly() {
        let items: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        let refs: Vec<&str> = items.iter().map(String::as_str).collect();

        assert_eq!(select_evenly(&refs, 4), vec!["0", "3", "6", "9"]);
        assert_eq!(select_evenly(&refs, 2), vec!["0", "9"]);
        assert_eq!(select_evenly(&refs, 1), vec!["0"]);
        assert_eq!(select_evenly(&refs, 20).len(), 10);
    }

    #[test]
    fn test_messages_keep_order_and_skip_failures() {
        let engine = engine(ScriptedBackend::echo(), SynthesisConfig::default());
        let doc = ProcessedDocument::new(
            "doc.txt",
            vec![
                ChunkSummary::succeeded(0, "alpha", 1),
                ChunkSummary::failed(1, "engine error", 2),
                ChunkSummary::succeeded(2, "gamma", 2),
            ],
        );

        let messages = engine.build_messages(&doc, "Summarize").unwrap();
        let prompt = &messages[1].content;
        assert!(prompt.contains("alpha\n\n---\n\ngamma"));
        assert!(!prompt.contains("engine error"));
    }

    #[test]
    fn test_cap_halves_until_prompt_fits() {
        let config = SynthesisConfig {
            max_prompt_chars: 1500,
            ..SynthesisConfig::default()
        };
        let engine = engine(ScriptedBackend::echo(), config);
        let long = "w".repeat(600);
        let doc = document(&[&long, &long, &long, &long]);

        let messages = engine.build_messages(&doc, "Summarize").unwrap();
        let rendered = GenerationRequest::new(messages, 1500)
            .render(crate::generation::ChatTemplate::Plain)
            .unwrap();
        assert!(rendered.char_len() <= 1500);
        assert!(!rendered.as_str().contains(&"w".repeat(300)));
    }

    #[test]
    fn test_prompt_too_long_at_floor() {
        let config = SynthesisConfig {
            max_prompt_chars: 300,
            ..SynthesisConfig::default()
        };
        let engine = engine(ScriptedBackend::echo(), config);
        let doc = document(&["a summary"]);

        assert!(matches!(
            engine.build_messages(&doc, &"q".repeat(400)),
            Err(PipelineError::Generation(GenerationError::PromptTooLong { .. }))
        ));
    }

    #[test]
    fn test_nothing_succeeded() {
        let engine = engine(ScriptedBackend::echo(), SynthesisConfig::default());
        let doc = ProcessedDocument::new("doc.txt", vec![ChunkSummary::failed(0, "x", 2)]);
        assert!(matches!(
            engine.build_messages(&doc, "Summarize"),
            Err(PipelineError::InsufficientCoverage { .. })
        ));
    }

    #[tokio::test]
    async fn test_synthesize_streams_tokens() {
        #[derive(Default)]
        struct Tokens(Mutex<String>);
        impl ProgressSink for Tokens {
            fn on_progress(&self, _update: &ProgressUpdate) {}
            fn on_token(&self, token: &str) {
                self.0.lock().unwrap().push_str(token);
            }
        }

        let backend = ScriptedBackend::new(|_| ScriptedReply::Text("The final answer.".to_string()));
        let engine = engine(backend, SynthesisConfig::default());
        engine.generator.runtime().load("m").await.unwrap();

        let sink = Tokens::default();
        let answer = engine
            .synthesize(&document(&["one", "two"]), "Summarize", &sink)
            .await
            .unwrap();
        assert_eq!(answer, "The final answer.");
        assert_eq!(*sink.0.lock().unwrap(), "The final answer.");
    }

    #[tokio::test]
    async fn test_empty_answer_is_generation_failure() {
        let backend = ScriptedBackend::new(|_| ScriptedReply::Text(String::new()));
        let engine = engine(backend, SynthesisConfig::default());
        engine.generator.runtime().load("m").await.unwrap();

        let err = engine
            .synthesize(&document(&["one"]), "Summarize", &NoopProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::GenerationFailed { .. }));
    }
}
