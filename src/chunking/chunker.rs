//! Profile-aware fixed-window chunking.
//!
//! Splits a document into consecutive character windows whose size is
//! derived from the model profile and the content density. Windows never
//! overlap, never split a multi-byte character, and concatenate back to
//! the original text.

use serde::{Deserialize, Serialize};

use crate::chunking::{
    ContentDensity, DEFAULT_BASE_CHUNK_SIZE, DEFAULT_MAX_CHUNK_SIZE, DEFAULT_MIN_CHUNK_SIZE,
    ModelProfile,
};
use crate::core::Chunk;
use crate::error::{ChunkingError, Result};
use crate::io::unicode::char_window_offsets;

/// Chunk size bounds, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkSizing {
    /// Size before profile and density scaling.
    pub base: usize,
    /// Lower clamp.
    pub min: usize,
    /// Upper clamp.
    pub max: usize,
}

impl Default for ChunkSizing {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE_CHUNK_SIZE,
            min: DEFAULT_MIN_CHUNK_SIZE,
            max: DEFAULT_MAX_CHUNK_SIZE,
        }
    }
}

impl ChunkSizing {
    /// Validates the bounds.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkingError::InvalidConfig`] when a bound is zero or
    /// `min > max`.
    pub fn validate(&self) -> Result<()> {
        if self.base == 0 || self.min == 0 {
            return Err(ChunkingError::InvalidConfig {
                reason: "chunk sizes must be > 0".to_string(),
            }
            .into());
        }
        if self.min > self.max {
            return Err(ChunkingError::InvalidConfig {
                reason: format!("min chunk size {} exceeds max {}", self.min, self.max),
            }
            .into());
        }
        Ok(())
    }
}

/// The chunk plan for one document.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkPlan {
    /// Window size used, in characters.
    pub chunk_size: usize,
    /// Profile applied.
    pub profile: ModelProfile,
    /// Density measured.
    pub density: ContentDensity,
    /// Chunks in document order.
    pub chunks: Vec<Chunk>,
}

/// Deterministic document splitter.
///
/// # Examples
///
/// ```
/// use local_llm::chunking::{DocumentChunker, ModelProfile};
///
/// let chunker = DocumentChunker::default();
/// let text = "Short words here. ".repeat(10);
/// let chunks = chunker.split(&text, &ModelProfile::UNKNOWN).unwrap();
/// assert_eq!(chunks.len(), 1);
/// assert_eq!(chunks[0].text(), text);
/// ```
#[derive(Debug, Clone, Default)]
pub struct DocumentChunker {
    sizing: ChunkSizing,
}

impl DocumentChunker {
    /// Creates a chunker with custom bounds.
    #[must_use]
    pub const fn new(sizing: ChunkSizing) -> Self {
        Self { sizing }
    }

    /// Returns the sizing bounds.
    #[must_use]
    pub const fn sizing(&self) -> &ChunkSizing {
        &self.sizing
    }

    /// Computes the window size for `text` under `profile`.
    ///
    /// `base × multiplier × density`, rounded, then clamped to `[min, max]`.
    #[must_use]
    pub fn effective_size(&self, text: &str, profile: &ModelProfile) -> usize {
        self.size_for(&ContentDensity::analyze(text), profile)
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn size_for(&self, density: &ContentDensity, profile: &ModelProfile) -> usize {
        let scaled = (self.sizing.base as f64 * profile.multiplier * density.factor()).round();
        (scaled.max(0.0) as usize).clamp(self.sizing.min, self.sizing.max.max(self.sizing.min))
    }

    /// Splits `text` into ordered, non-empty chunks.
    ///
    /// Chunk `i` covers characters `[i*size, min((i+1)*size, len))`. Empty
    /// input yields no chunks.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkingError::InvalidConfig`] if the sizing is invalid.
    pub fn split(&self, text: &str, profile: &ModelProfile) -> Result<Vec<Chunk>> {
        Ok(self.plan(text, profile)?.chunks)
    }

    /// Splits `text` and reports the parameters that produced the split.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkingError::InvalidConfig`] if the sizing is invalid.
    pub fn plan(&self, text: &str, profile: &ModelProfile) -> Result<ChunkPlan> {
        self.sizing.validate()?;

        let density = ContentDensity::analyze(text);
        let chunk_size = self.size_for(&density, profile);
        let offsets = char_window_offsets(text, chunk_size);

        let mut chunks = Vec::with_capacity(offsets.len().saturating_sub(1));
        let mut char_start = 0;
        for (index, window) in offsets.windows(2).enumerate() {
            let (start, end) = (window[0], window[1]);
            let content = &text[start..end];
            let char_end = char_start + content.chars().count();
            chunks.push(Chunk::new(
                index,
                content.to_string(),
                char_start..char_end,
                start..end,
            ));
            char_start = char_end;
        }

        tracing::debug!(
            chunk_size,
            chunks = chunks.len(),
            multiplier = profile.multiplier,
            density = density.factor(),
            "planned document chunks"
        );

        Ok(ChunkPlan {
            chunk_size,
            profile: *profile,
            density,
            chunks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 100 characters of plain prose in a short paragraph.
    fn plain_unit() -> String {
        let unit = "The cat sat on the mat. The dog ran to the parks. We had tea at noon. It was a fine day out there.\n\n";
        assert_eq!(unit.chars().count(), 100);
        unit.to_string()
    }

    #[test]
    fn test_effective_size_defaults() {
        let chunker = DocumentChunker::default();
        let text = plain_unit().repeat(70);
        assert_eq!(chunker.effective_size(&text, &ModelProfile::UNKNOWN), 2000);
    }

    #[test]
    fn test_effective_size_scales_with_profile() {
        let chunker = DocumentChunker::default();
        let text = plain_unit().repeat(10);
        assert_eq!(
            chunker.effective_size(&text, &ModelProfile::for_model("llama3.2:1b")),
            2600
        );
        assert_eq!(
            chunker.effective_size(&text, &ModelProfile::for_model("llama2:13b")),
            1700
        );
    }

    #[test]
    fn test_effective_size_clamps() {
        let chunker = DocumentChunker::new(ChunkSizing {
            base: 10_000,
            min: 500,
            max: 4000,
        });
        assert_eq!(chunker.effective_size("a b c.", &ModelProfile::UNKNOWN), 4000);

        let chunker = DocumentChunker::new(ChunkSizing {
            base: 100,
            min: 500,
            max: 4000,
        });
        assert_eq!(chunker.effective_size("a b c.", &ModelProfile::UNKNOWN), 500);
    }

    #[test]
    fn test_effective_size_dense_content() {
        let chunker = DocumentChunker::default();
        let text = "Internationalization electroencephalography. ".repeat(50);
        assert_eq!(chunker.effective_size(&text, &ModelProfile::UNKNOWN), 1400);
    }

    #[test]
    fn test_split_seven_thousand_chars() {
        let chunker = DocumentChunker::default();
        let text = plain_unit().repeat(70);
        let chunks = chunker.split(&text, &ModelProfile::UNKNOWN).unwrap();

        let lengths: Vec<_> = chunks.iter().map(Chunk::char_len).collect();
        assert_eq!(lengths, vec![2000, 2000, 2000, 1000]);
        assert_eq!(chunks[3].char_range(), &(6000..7000));
    }

    #[test]
    fn test_split_empty() {
        let chunker = DocumentChunker::default();
        assert!(chunker.split("", &ModelProfile::UNKNOWN).unwrap().is_empty());
    }

    #[test]
    fn test_split_multibyte_boundaries() {
        let chunker = DocumentChunker::new(ChunkSizing {
            base: 500,
            min: 500,
            max: 500,
        });
        let text = "日本語のテキスト。".repeat(120);
        let chunks = chunker.split(&text, &ModelProfile::UNKNOWN).unwrap();

        assert_eq!(chunks.len(), 3);
        for chunk in &chunks {
            assert_eq!(&text[chunk.byte_range().clone()], chunk.text());
        }
        let joined: String = chunks.iter().map(Chunk::text).collect();
        assert_eq!(joined, text);
    }

    #[test]
    fn test_invalid_sizing() {
        let chunker = DocumentChunker::new(ChunkSizing {
            base: 2000,
            min: 3000,
            max: 1000,
        });
        assert!(chunker.split("text", &ModelProfile::UNKNOWN).is_err());

        let zero = ChunkSizing {
            base: 0,
            ..ChunkSizing::default()
        };
        assert!(zero.validate().is_err());
    }
}
