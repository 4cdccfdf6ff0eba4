//! Generation requests and the prompt ceiling.

use serde::{Deserialize, Serialize};

use crate::error::GenerationError;
use crate::generation::{ChatMessage, ChatTemplate};

/// Default hard ceiling on a chat prompt, in characters.
pub const DEFAULT_MAX_PROMPT_CHARS: usize = 4096;

/// An ordered conversation plus the ceiling its rendered prompt must fit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    messages: Vec<ChatMessage>,
    max_prompt_chars: usize,
}

impl GenerationRequest {
    /// Creates a request.
    #[must_use]
    pub const fn new(messages: Vec<ChatMessage>, max_prompt_chars: usize) -> Self {
        Self {
            messages,
            max_prompt_chars,
        }
    }

    /// Messages in order.
    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Ceiling in characters.
    #[must_use]
    pub const fn max_prompt_chars(&self) -> usize {
        self.max_prompt_chars
    }

    /// Renders the full prompt and checks it against the ceiling.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError::PromptTooLong`] when the rendered
    /// prompt exceeds the ceiling. Nothing is truncated here.
    pub fn render(&self, template: ChatTemplate) -> Result<RenderedPrompt, GenerationError> {
        let text = template.format(&self.messages);
        let length = text.chars().count();
        if length > self.max_prompt_chars {
            return Err(GenerationError::PromptTooLong {
                length,
                limit: self.max_prompt_chars,
            });
        }
        Ok(RenderedPrompt { text, length })
    }
}

/// A templated prompt that has passed its ceiling check.
///
/// Only [`GenerationRequest::render`] produces one, so the runtime never
/// sees an unchecked prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    text: String,
    length: usize,
}

impl RenderedPrompt {
    /// Prompt text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Length in characters.
    #[must_use]
    pub const fn char_len(&self) -> usize {
        self.length
    }
}

/// Limits applied to prior turns before a chat prompt is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryWindow {
    /// Most recent messages kept.
    pub max_messages: usize,
    /// Total characters kept across those messages.
    pub max_chars: usize,
}

impl Default for HistoryWindow {
    fn default() -> Self {
        Self {
            max_messages: 8,
            max_chars: 3400,
        }
    }
}

impl HistoryWindow {
    /// Keeps the most recent `max_messages`, then drops the oldest until
    /// the total fits `max_chars`.
    #[must_use]
    pub fn apply(&self, history: &[ChatMessage]) -> Vec<ChatMessage> {
        let start = history.len().saturating_sub(self.max_messages);
        let mut kept: Vec<ChatMessage> = history[start..].to_vec();

        let mut total: usize = kept.iter().map(ChatMessage::char_len).sum();
        let mut drop_count = 0;
        while total > self.max_chars && drop_count < kept.len() {
            total -= kept[drop_count].char_len();
            drop_count += 1;
        }
        if drop_count > 0 {
            tracing::debug!(dropped = drop_count, kept_chars = total, "trimmed chat history");
            kept.drain(..drop_count);
        }
        kept
    }

    /// Drops stored messages older than the `max_messages` most recent,
    /// so a long session's history stays bounded.
    pub fn retain(&self, history: &mut Vec<ChatMessage>) {
        let excess = history.len().saturating_sub(self.max_messages);
        if excess > 0 {
            history.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_within_ceiling() {
        let request = GenerationRequest::new(vec![ChatMessage::user("Hi")], 100);
        let prompt = request.render(ChatTemplate::Plain).unwrap();
        assert_eq!(prompt.as_str(), "User: Hi\nAssistant:");
        assert_eq!(prompt.char_len(), 19);
    }

    #[test]
    fn test_render_over_ceiling() {
        let request = GenerationRequest::new(vec![ChatMessage::user("x".repeat(100))], 50);
        let err = request.render(ChatTemplate::Plain).unwrap_err();
        assert!(matches!(
            err,
            GenerationError::PromptTooLong {
                length: 117,
                limit: 50
            }
        ));
    }

    #[test]
    fn test_ceiling_counts_characters_not_bytes() {
        let request = GenerationRequest::new(vec![ChatMessage::user("世".repeat(10))], 27);
        assert!(request.render(ChatTemplate::Plain).is_ok());
    }

    #[test]
    fn test_history_keeps_recent_messages() {
        let history: Vec<_> = (0..12).map(|i| ChatMessage::user(format!("m{i}"))).collect();
        let kept = HistoryWindow::default().apply(&history);
        assert_eq!(kept.len(), 8);
        assert_eq!(kept[0].content, "m4");
        assert_eq!(kept[7].content, "m11");
    }

    #[test]
    fn test_history_trims_oldest_over_char_cap() {
        let history = vec![
            ChatMessage::user("a".repeat(2000)),
            ChatMessage::assistant("b".repeat(1000)),
            ChatMessage::user("c".repeat(1000)),
        ];
        let kept = HistoryWindow::default().apply(&history);
        assert_eq!(kept.len(), 2);
        assert!(kept[0].content.starts_with('b'));
    }

    #[test]
    fn test_history_single_oversized_message_dropped() {
        let window = HistoryWindow {
            max_messages: 8,
            max_chars: 10,
        };
        let kept = window.apply(&[ChatMessage::user("x".repeat(20))]);
        assert!(kept.is_empty());
    }

    #[test]
    fn test_retain_bounds_stored_history() {
        let window = HistoryWindow {
            max_messages: 2,
            max_chars: 100,
        };
        let mut history = vec![
            ChatMessage::user("one"),
            ChatMessage::assistant("two"),
            ChatMessage::user("three"),
        ];
        window.retain(&mut history);
        assert_eq!(history, vec![ChatMessage::assistant("two"), ChatMessage::user("three")]);

        window.retain(&mut history);
        assert_eq!(history.len(), 2);
    }
}
