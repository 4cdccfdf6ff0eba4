//! Plain-text document loading.
//!
//! Documents above [`MMAP_THRESHOLD`] are decoded straight out of a
//! read-only mapping; smaller ones are read in one call. Either way the
//! text is normalized the same way before it reaches the chunker.

// Memory mapping requires unsafe but is well-documented and safe for read-only access
#![allow(unsafe_code)]

use crate::error::{IoError, Result};
use memmap2::Mmap;
use std::borrow::Cow;
use std::fs::{self, File};
use std::path::Path;

/// Size from which documents are memory-mapped (1MB).
pub const MMAP_THRESHOLD: u64 = 1024 * 1024;

/// Largest document accepted (256MB).
pub const MAX_DOCUMENT_BYTES: u64 = 256 * 1024 * 1024;

const UTF8_BOM: &str = "\u{feff}";

/// Text loaded from disk, with the size of its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedText {
    /// Normalized text.
    pub text: String,
    /// Size of the file in bytes, before normalization.
    pub source_bytes: u64,
    /// Whether the file was memory-mapped.
    pub mapped: bool,
}

/// Loads a plain-text document.
///
/// A leading byte-order mark is dropped and `\r\n` line endings become
/// `\n`, so chunk offsets do not depend on the platform that wrote the
/// file.
///
/// # Errors
///
/// Returns [`IoError::FileNotFound`] for a missing path,
/// [`IoError::ReadFailed`] when the file is unreadable, too large, or not
/// UTF-8, and [`IoError::MmapFailed`] when mapping a large file fails.
pub fn load_text<P: AsRef<Path>>(path: P) -> Result<LoadedText> {
    let path = path.as_ref();
    let display = path.to_string_lossy().to_string();
    let read_failed = |reason: String| IoError::ReadFailed {
        path: display.clone(),
        reason,
    };

    let metadata = fs::metadata(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => IoError::FileNotFound {
            path: display.clone(),
        },
        _ => read_failed(e.to_string()),
    })?;
    if !metadata.is_file() {
        return Err(read_failed("not a regular file".to_string()).into());
    }

    let source_bytes = metadata.len();
    if source_bytes > MAX_DOCUMENT_BYTES {
        return Err(read_failed(format!(
            "document too large: {source_bytes} bytes (max: {MAX_DOCUMENT_BYTES} bytes)"
        ))
        .into());
    }

    let mapped = source_bytes >= MMAP_THRESHOLD;
    let text = if mapped {
        let file = File::open(path).map_err(|e| read_failed(e.to_string()))?;
        // Safety: the mapping is read-only and dropped before returning
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| IoError::MmapFailed {
            path: display.clone(),
            reason: e.to_string(),
        })?;
        let decoded =
            std::str::from_utf8(&mmap).map_err(|e| read_failed(format!("invalid UTF-8: {e}")))?;
        normalize(decoded).into_owned()
    } else {
        let bytes = fs::read(path).map_err(|e| read_failed(e.to_string()))?;
        let decoded =
            String::from_utf8(bytes).map_err(|e| read_failed(format!("invalid UTF-8: {e}")))?;
        let normalized = match normalize(&decoded) {
            Cow::Owned(normalized) => Some(normalized),
            Cow::Borrowed(stripped) if stripped.len() == decoded.len() => None,
            Cow::Borrowed(stripped) => Some(stripped.to_string()),
        };
        normalized.unwrap_or(decoded)
    };

    Ok(LoadedText {
        text,
        source_bytes,
        mapped,
    })
}

/// Strips a leading BOM and folds CRLF line endings.
#[must_use]
pub fn normalize(text: &str) -> Cow<'_, str> {
    let text = text.strip_prefix(UTF8_BOM).unwrap_or(text);
    if text.contains("\r\n") {
        Cow::Owned(text.replace("\r\n", "\n"))
    } else {
        Cow::Borrowed(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use tempfile::TempDir;

    #[test]
    fn test_load_small_document() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("notes.txt");
        std::fs::write(&path, "Hello, world!").unwrap();

        let loaded = load_text(&path).unwrap();
        assert_eq!(loaded.text, "Hello, world!");
        assert_eq!(loaded.source_bytes, 13);
        assert!(!loaded.mapped);
    }

    #[test]
    fn test_load_missing_document() {
        let result = load_text("/nonexistent/path/file.txt");
        assert!(matches!(
            result,
            Err(Error::Io(IoError::FileNotFound { .. }))
        ));
    }

    #[test]
    fn test_load_directory_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let err = load_text(temp_dir.path()).unwrap_err();
        assert!(err.to_string().contains("not a regular file"));
    }

    #[test]
    fn test_large_document_is_mapped() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("large.txt");
        let content = "word ".repeat(300_000);
        std::fs::write(&path, &content).unwrap();

        let loaded = load_text(&path).unwrap();
        assert!(loaded.mapped);
        assert_eq!(loaded.text, content);
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("binary.bin");
        std::fs::write(&path, [0xFF, 0xFE, 0x00]).unwrap();

        let err = load_text(&path).unwrap_err();
        assert!(err.to_string().contains("invalid UTF-8"));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("\u{feff}a\r\nb"), "a\nb");
        assert!(matches!(normalize("plain\ntext"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_bom_counted_in_source_bytes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bom.txt");
        std::fs::write(&path, "\u{feff}line one\r\nline two").unwrap();

        let loaded = load_text(&path).unwrap();
        assert_eq!(loaded.text, "line one\nline two");
        assert_eq!(loaded.source_bytes, 21);
    }

    #[test]
    fn test_bom_stripped_without_crlf() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bom_lf.txt");
        std::fs::write(&path, "\u{feff}one\ntwo").unwrap();

        let loaded = load_text(&path).unwrap();
        assert_eq!(loaded.text, "one\ntwo");
        assert_eq!(loaded.source_bytes, 10);
    }
}
