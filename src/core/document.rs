//! Document ingestion types.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;
use crate::io::load_text;

/// A plain-text document handed to the pipeline.
///
/// Format extraction happens upstream; by the time a document reaches
/// this crate its content is already text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    /// Display name, used in prompts and as the cache identity.
    pub file_name: String,
    /// Decoded text content.
    pub content: String,
    /// Content type hint, e.g. `txt` or `md`.
    pub kind: String,
    /// Size of the source in bytes.
    pub size: u64,
}

impl FileContent {
    /// Builds a document from in-memory text.
    #[must_use]
    pub fn from_text(file_name: impl Into<String>, content: impl Into<String>) -> Self {
        let file_name = file_name.into();
        let content = content.into();
        let kind = kind_from_name(&file_name);
        Self {
            size: content.len() as u64,
            file_name,
            content,
            kind,
        }
    }

    /// Reads a plain-text file from disk.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file is missing, unreadable, or not UTF-8.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let loaded = load_text(path)?;
        let file_name = path
            .file_name()
            .map_or_else(|| path.to_string_lossy().to_string(), |n| n.to_string_lossy().to_string());

        Ok(Self {
            kind: kind_from_name(&file_name),
            size: loaded.source_bytes,
            file_name,
            content: loaded.text,
        })
    }

    /// Returns the content length in characters.
    #[must_use]
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}

fn kind_from_name(name: &str) -> String {
    Path::new(name)
        .extension()
        .map_or_else(|| "txt".to_string(), |e| e.to_string_lossy().to_lowercase())
}
