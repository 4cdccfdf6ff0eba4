//! # local-llm
//!
//! Local language model runtime with streaming chat and chunked analysis
//! of documents larger than the model's context window.
//!
//! Two subsystems carry the weight:
//!
//! - **Model runtime** ([`runtime`]): load, unload and generate against
//!   an inference engine, one operation at a time, every operation
//!   bounded by a timeout.
//! - **Document pipeline** ([`pipeline`]): split a large document into
//!   model-sized chunks, summarize them one by one with a single retry
//!   each, and synthesize one answer. Summaries are cached briefly so
//!   follow-up questions skip the re-chunking.
//!
//! [`Assistant`] assembles both over a chosen engine [`backend`].
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use local_llm::backend::ScriptedBackend;
//! use local_llm::pipeline::NoopProgress;
//! use local_llm::{Assistant, Config, FileContent};
//!
//! # async fn demo() -> local_llm::Result<()> {
//! let assistant = Assistant::init(Config::default(), Arc::new(ScriptedBackend::echo()))?;
//! let document = FileContent::from_text("notes.txt", "A long document. ".repeat(1000));
//! let answer = assistant.process(&document, "Summarize", &NoopProgress).await?;
//! assert!(!answer.is_empty());
//! # Ok(())
//! # }
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
// unsafe is confined to memory-mapped document loading
#![warn(unsafe_code)]

pub mod assistant;
pub mod backend;
pub mod cache;
pub mod chunking;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod generation;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod runtime;

// Re-export commonly used types at crate root
pub use error::{Error, Result};

pub use assistant::Assistant;
pub use cache::ResultCache;
pub use config::{Config, EngineConfig, EngineKind};

// Re-export core domain types
pub use core::{Chunk, ChunkOutcome, ChunkSummary, FileContent, ProcessedDocument};

// Re-export chunking types
pub use chunking::{ChunkPlan, ChunkSizing, DocumentChunker, ModelProfile};

// Re-export runtime and generation types
pub use generation::{ChatMessage, ChatTemplate, GenerationStream, Role};
pub use runtime::{ModelRuntime, RuntimeConfig, TokenStream};

// Re-export pipeline types
pub use pipeline::{ChunkProcessor, ProgressSink, SynthesisEngine};

// Re-export CLI types
pub use cli::{Cli, Commands, OutputFormat};
