//! Chunk representation.
//!
//! A chunk is an immutable, ordered slice of a document. Positions are
//! tracked both in characters (the unit chunk sizes are expressed in)
//! and in UTF-8 bytes (the unit slicing works in).

use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::io::find_char_boundary;

/// A bounded piece of a document.
///
/// # Examples
///
/// ```
/// use local_llm::core::Chunk;
///
/// let chunk = Chunk::new(0, "Hello, world!".to_string(), 0..13, 0..13);
/// assert_eq!(chunk.char_len(), 13);
/// assert_eq!(chunk.number(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    index: usize,
    char_range: Range<usize>,
    byte_range: Range<usize>,
    text: String,
}

impl Chunk {
    /// Creates a new chunk.
    ///
    /// # Arguments
    ///
    /// * `index` - Position of the chunk within its document (0-based).
    /// * `text` - Chunk content.
    /// * `char_range` - Range in the document, in Unicode scalar values.
    /// * `byte_range` - Range in the document, in UTF-8 bytes.
    #[must_use]
    pub const fn new(
        index: usize,
        text: String,
        char_range: Range<usize>,
        byte_range: Range<usize>,
    ) -> Self {
        Self {
            index,
            char_range,
            byte_range,
            text,
        }
    }

    /// Returns the 0-based index.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Returns the 1-based part number used in prompts and progress.
    #[must_use]
    pub const fn number(&self) -> usize {
        self.index + 1
    }

    /// Returns the chunk content.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns the character range in the source document.
    #[must_use]
    pub const fn char_range(&self) -> &Range<usize> {
        &self.char_range
    }

    /// Returns the byte range in the source document.
    #[must_use]
    pub const fn byte_range(&self) -> &Range<usize> {
        &self.byte_range
    }

    /// Returns the length in characters.
    #[must_use]
    pub const fn char_len(&self) -> usize {
        self.char_range.end - self.char_range.start
    }

    /// Returns the size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.text.len()
    }

    /// Checks if the chunk is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Estimates token count using the ~4 characters per token heuristic.
    #[must_use]
    pub const fn estimate_tokens(&self) -> usize {
        self.char_len().div_ceil(4)
    }

    /// Returns a preview of the chunk content (at most `max_len` bytes).
    #[must_use]
    pub fn preview(&self, max_len: usize) -> &str {
        if self.text.len() <= max_len {
            &self.text
        } else {
            let end = find_char_boundary(&self.text, max_len);
            &self.text[..end]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_accessors() {
        let chunk = Chunk::new(2, "héllo".to_string(), 10..15, 12..18);
        assert_eq!(chunk.index(), 2);
        assert_eq!(chunk.number(), 3);
        assert_eq!(chunk.text(), "héllo");
        assert_eq!(chunk.char_len(), 5);
        assert_eq!(chunk.size(), 6);
        assert_eq!(chunk.byte_range(), &(12..18));
        assert!(!chunk.is_empty());
    }

    #[test]
    fn test_estimate_tokens() {
        let chunk = Chunk::new(0, "a".repeat(10), 0..10, 0..10);
        assert_eq!(chunk.estimate_tokens(), 3);
    }

    #[test]
    fn test_preview_respects_boundaries() {
        let chunk = Chunk::new(0, "Hello 世界".to_string(), 0..8, 0..12);
        assert_eq!(chunk.preview(5), "Hello");
        assert_eq!(chunk.preview(7), "Hello ");
        assert_eq!(chunk.preview(100), "Hello 世界");
    }

    #[test]
    fn test_chunk_serialization() {
        let chunk = Chunk::new(1, "text".to_string(), 4..8, 4..8);
        let json = serde_json::to_string(&chunk).unwrap();
        let back: Chunk = serde_json::from_str(&json).unwrap();
        assert_eq!(chunk, back);
    }
}
