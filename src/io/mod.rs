//! I/O utilities for local-llm.
//!
//! Plain-text document loading, with memory mapping for large files,
//! and the Unicode helpers used by chunking and prompt building.

pub mod reader;
pub mod unicode;

pub use reader::{LoadedText, load_text};
pub use unicode::{find_char_boundary, sanitize_prompt_text, truncate_graphemes};
