//! Unicode utilities for text processing.
//!
//! Chunk offsets are counted in Unicode scalar values while slices are
//! taken by byte; these helpers convert between the two and keep every
//! cut on a valid boundary.

use std::sync::OnceLock;

use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

/// Finds a valid UTF-8 character boundary at or before the given position.
///
/// # Arguments
///
/// * `s` - The string to search.
/// * `pos` - Target position in bytes.
///
/// # Examples
///
/// ```
/// use local_llm::io::find_char_boundary;
///
/// let s = "Hello 世界";
/// assert_eq!(find_char_boundary(s, 6), 6); // Before '世'
/// assert_eq!(find_char_boundary(s, 7), 6); // Middle of '世', backs up
/// ```
#[must_use]
pub const fn find_char_boundary(s: &str, pos: usize) -> usize {
    if pos >= s.len() {
        return s.len();
    }
    let bytes = s.as_bytes();
    let mut boundary = pos;
    // UTF-8 continuation bytes start with 10xxxxxx (0x80-0xBF)
    while boundary > 0 && (bytes[boundary] & 0xC0) == 0x80 {
        boundary -= 1;
    }
    boundary
}

/// Returns the byte offset of every `step`-th character, plus the end.
///
/// The result always starts with `0` and ends with `s.len()`, so
/// consecutive pairs are the byte ranges of `step`-character windows.
/// An empty string yields `[0]`.
///
/// # Examples
///
/// ```
/// use local_llm::io::unicode::char_window_offsets;
///
/// assert_eq!(char_window_offsets("abcde", 2), vec![0, 2, 4, 5]);
/// assert_eq!(char_window_offsets("ééé", 2), vec![0, 4, 6]);
/// ```
#[must_use]
pub fn char_window_offsets(s: &str, step: usize) -> Vec<usize> {
    let step = step.max(1);
    let mut offsets = vec![0];
    for (count, (byte_pos, _)) in s.char_indices().enumerate() {
        if count > 0 && count % step == 0 {
            offsets.push(byte_pos);
        }
    }
    if !s.is_empty() {
        offsets.push(s.len());
    }
    offsets
}

/// Counts Unicode scalar values.
#[must_use]
pub fn char_count(s: &str) -> usize {
    s.chars().count()
}

/// Truncates a string at a grapheme cluster boundary.
///
/// # Arguments
///
/// * `s` - The string to truncate.
/// * `max_graphemes` - Maximum number of grapheme clusters.
#[must_use]
pub fn truncate_graphemes(s: &str, max_graphemes: usize) -> &str {
    let mut end_byte = 0;

    for (count, grapheme) in s.graphemes(true).enumerate() {
        if count >= max_graphemes {
            break;
        }
        end_byte += grapheme.len();
    }

    &s[..end_byte]
}

/// Counts words using Unicode word boundaries.
#[must_use]
pub fn word_count(s: &str) -> usize {
    s.unicode_words().count()
}

/// Splits text into sentences (approximate).
///
/// Splits on `.`, `!`, `?` followed by whitespace or the end of input.
#[must_use]
pub fn split_sentences(s: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;

    let bytes = s.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        if matches!(c, b'.' | b'!' | b'?') && (i + 1 >= bytes.len() || bytes[i + 1].is_ascii_whitespace())
        {
            let end = i + 1;
            if end > start {
                sentences.push(&s[start..end]);
            }
            i += 1;
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            start = i;
            continue;
        }
        i += 1;
    }

    if start < s.len() {
        sentences.push(&s[start..]);
    }

    sentences
}

/// Splits text into paragraphs on blank lines, dropping empty ones.
pub fn split_paragraphs(s: &str) -> impl Iterator<Item = &str> {
    static PARAGRAPH_BREAK: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::expect_used)]
    let re = PARAGRAPH_BREAK.get_or_init(|| Regex::new(r"\n[ \t]*\n").expect("valid regex"));
    re.split(s).filter(|p| !p.trim().is_empty())
}

/// Removes NUL and control characters other than `\t`, `\n` and `\r`.
///
/// Inference engines receive prompts as C strings, so an embedded NUL
/// would silently truncate the prompt.
///
/// # Examples
///
/// ```
/// use local_llm::io::unicode::sanitize_prompt_text;
///
/// assert_eq!(sanitize_prompt_text("a\0b\u{7}c\n"), "abc\n");
/// ```
#[must_use]
pub fn sanitize_prompt_text(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_control() || matches!(c, '\t' | '\n' | '\r'))
        .collect()
}
