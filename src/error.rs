//! Error types for local-llm operations.
//!
//! Each layer owns its own `thiserror` enum; the crate-level [`Error`]
//! wraps them so callers can match on the layer that failed or simply
//! propagate with `?`.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for local-llm operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Model runtime errors (load, unload, generation guards).
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// Prompt building and generation errors.
    #[error("generation error: {0}")]
    Generation(#[from] GenerationError),

    /// Chunking errors.
    #[error("chunking error: {0}")]
    Chunking(#[from] ChunkingError),

    /// Document pipeline errors.
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// I/O errors (file operations).
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// CLI command errors.
    #[error("command error: {0}")]
    Command(#[from] CommandError),

    /// Configuration errors.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },
}

impl Error {
    /// Returns true when the failure is a busy or timeout condition.
    ///
    /// These are reported to the user as "try again"; nothing retries
    /// them automatically at the top level.
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Runtime(err) => err.is_transient(),
            Self::Generation(GenerationError::Runtime(err)) => err.is_transient(),
            Self::Pipeline(PipelineError::Generation(GenerationError::Runtime(err))) => {
                err.is_transient()
            }
            Self::Pipeline(PipelineError::Runtime(err)) => err.is_transient(),
            _ => false,
        }
    }
}

/// Errors raised by an inference engine backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The engine could not be reached or initialised.
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    /// The requested model does not exist in the engine.
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// The engine ran out of memory or another native resource.
    #[error("engine resources exhausted: {0}")]
    Exhausted(String),

    /// The engine failed while evaluating or sampling.
    #[error("engine failure: {0}")]
    Engine(String),

    /// The engine returned output that could not be decoded.
    #[error("malformed engine response: {0}")]
    Protocol(String),
}

/// Model runtime errors.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// A generation or model operation is already active.
    #[error("model runtime is busy, try again")]
    ResourceBusy,

    /// Another load or unload is in flight.
    #[error("a model load or unload is already in progress")]
    AlreadyInProgress,

    /// An operation exceeded its time bound.
    #[error("{operation} timed out after {limit:?}")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
        /// The configured bound.
        limit: Duration,
    },

    /// The model weights could not be loaded.
    #[error("failed to load model {model_id}: {source}")]
    LoadFailed {
        /// Requested model identifier.
        model_id: String,
        /// Backend failure.
        source: BackendError,
    },

    /// The inference context could not be created.
    #[error("failed to create inference context: {0}")]
    ContextCreationFailed(BackendError),

    /// No model is loaded.
    #[error("no model is loaded")]
    NotLoaded,

    /// The engine ran out of native resources during generation.
    #[error("native resources exhausted: {0}")]
    ResourceExhausted(String),

    /// The engine failed during generation.
    #[error("generation failed: {0}")]
    GenerationFailed(String),
}

impl RuntimeError {
    /// Returns true for busy and timeout conditions.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ResourceBusy | Self::AlreadyInProgress | Self::Timeout { .. }
        )
    }

    /// Maps a backend failure raised while generating.
    pub(crate) fn from_generation(err: BackendError) -> Self {
        match err {
            BackendError::Exhausted(reason) => Self::ResourceExhausted(reason),
            other => Self::GenerationFailed(other.to_string()),
        }
    }
}

/// Prompt building and generation errors.
#[derive(Error, Debug)]
pub enum GenerationError {
    /// The instruction was empty or whitespace only.
    #[error("instruction is empty")]
    EmptyInput,

    /// The assembled prompt exceeds the hard ceiling.
    #[error("prompt is {length} characters, limit is {limit}")]
    PromptTooLong {
        /// Assembled prompt length in characters.
        length: usize,
        /// Configured ceiling in characters.
        limit: usize,
    },

    /// Generation was cancelled before it produced a result.
    #[error("generation cancelled")]
    Cancelled,

    /// The runtime rejected or failed the generation.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Chunking errors.
#[derive(Error, Debug)]
pub enum ChunkingError {
    /// Invalid chunk sizing configuration.
    #[error("invalid chunk configuration: {reason}")]
    InvalidConfig {
        /// Reason the configuration is invalid.
        reason: String,
    },

    /// The document has no content to chunk.
    #[error("document {document} is empty")]
    EmptyDocument {
        /// Document identity.
        document: String,
    },
}

/// Document pipeline errors.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A single chunk failed both attempts. Recorded internally, never surfaced alone.
    #[error("chunk {index} failed: {reason}")]
    ChunkFailed {
        /// Chunk index.
        index: usize,
        /// Last failure reason.
        reason: String,
    },

    /// Fewer than half of the chunks produced a summary.
    #[error("only {succeeded} of {total} chunks were summarized")]
    InsufficientCoverage {
        /// Chunks that succeeded.
        succeeded: usize,
        /// Chunks attempted.
        total: usize,
    },

    /// The model produced an empty or unusable answer.
    #[error("generation produced no usable answer: {reason}")]
    GenerationFailed {
        /// Why the output was rejected.
        reason: String,
    },

    /// No processed document is cached, or it expired.
    #[error("no processed document is available; process a document first")]
    CacheExpired,

    /// Chunking failed.
    #[error(transparent)]
    Chunking(#[from] ChunkingError),

    /// Prompt or generation failure outside chunk recovery.
    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// The runtime could not be acquired.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// I/O-specific errors for file operations.
#[derive(Error, Debug)]
pub enum IoError {
    /// File not found.
    #[error("file not found: {path}")]
    FileNotFound {
        /// Path to the file that was not found.
        path: String,
    },

    /// Failed to read file.
    #[error("failed to read file: {path}: {reason}")]
    ReadFailed {
        /// Path to the file.
        path: String,
        /// Reason for failure.
        reason: String,
    },

    /// Memory mapping error.
    #[error("memory mapping failed: {path}: {reason}")]
    MmapFailed {
        /// Path to the file.
        path: String,
        /// Reason for failure.
        reason: String,
    },

    /// Generic I/O error wrapper.
    #[error("I/O error: {0}")]
    Generic(String),
}

/// CLI command-specific errors.
#[derive(Error, Debug)]
pub enum CommandError {
    /// A flag value the command cannot use.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(IoError::Generic(err.to_string()))
    }
}


impl From<BackendError> for RuntimeError {
    fn from(err: BackendError) -> Self {
        Self::from_generation(err)
    }
}
