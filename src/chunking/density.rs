//! Content density analysis.
//!
//! Dense text (long words, long sentences, long paragraphs) is harder for
//! a small context to summarise, so it gets smaller chunks.

use serde::Serialize;

use crate::io::unicode::{char_count, split_paragraphs, split_sentences, word_count};

/// Average word length (characters per word) above which text counts as technical.
pub const TECHNICAL_WORD_LENGTH: f64 = 8.0;

/// Average sentence length (words) above which sentences count as long.
pub const LONG_SENTENCE_WORDS: f64 = 20.0;

/// Average paragraph length (sentences) above which paragraphs count as long.
pub const LONG_PARAGRAPH_SENTENCES: f64 = 5.0;

/// Measured density of a document.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ContentDensity {
    /// Characters per word.
    pub avg_word_len: f64,
    /// Words per sentence.
    pub avg_sentence_words: f64,
    /// Sentences per paragraph.
    pub avg_paragraph_sentences: f64,
}

impl ContentDensity {
    /// Measures `text`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn analyze(text: &str) -> Self {
        let chars = char_count(text) as f64;
        let words = word_count(text).max(1) as f64;
        let sentences = split_sentences(text).len().max(1) as f64;
        let paragraphs = split_paragraphs(text).count().max(1) as f64;

        Self {
            avg_word_len: chars / words,
            avg_sentence_words: words / sentences,
            avg_paragraph_sentences: sentences / paragraphs,
        }
    }

    /// Returns the size factor: the first matching rule wins.
    ///
    /// | condition | factor |
    /// |---|---|
    /// | word length > 8 | 0.7 |
    /// | sentence length > 20 words | 0.8 |
    /// | paragraph length > 5 sentences | 0.85 |
    /// | otherwise | 1.0 |
    #[must_use]
    pub fn factor(&self) -> f64 {
        if self.avg_word_len > TECHNICAL_WORD_LENGTH {
            0.7
        } else if self.avg_sentence_words > LONG_SENTENCE_WORDS {
            0.8
        } else if self.avg_paragraph_sentences > LONG_PARAGRAPH_SENTENCES {
            0.85
        } else {
            1.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_factor(text: &str, expected: f64) {
        let density = ContentDensity::analyze(text);
        assert!(
            (density.factor() - expected).abs() < f64::EPSILON,
            "expected {expected}, got {} for {density:?}",
            density.factor()
        );
    }

    #[test]
    fn test_plain_prose() {
        assert_factor("The cat sat on the mat. It was warm.\n\nThe dog slept.", 1.0);
    }

    #[test]
    fn test_technical_words() {
        assert_factor(
            "Internationalization characterization electroencephalography.",
            0.7,
        );
    }

    #[test]
    fn test_long_sentences() {
        let sentence = format!("{}end.", "and then it went on ".repeat(6));
        assert_factor(&sentence, 0.8);
    }

    #[test]
    fn test_long_paragraphs() {
        let paragraph = "One two. ".repeat(8);
        assert_factor(&paragraph, 0.85);
    }

    #[test]
    fn test_empty_text() {
        let density = ContentDensity::analyze("");
        assert!(density.avg_word_len.abs() < f64::EPSILON);
        assert_factor("", 1.0);
    }
}
