//! CLI layer for local-llm.
//!
//! Provides the command-line interface using clap, with commands for
//! chat, document processing, chunk inspection and configuration.

pub mod commands;
pub mod output;
pub mod parser;

pub use commands::execute;
pub use output::OutputFormat;
pub use parser::{Cli, Commands};
