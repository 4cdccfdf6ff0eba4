//! Command-line argument parsing.
//!
//! Defines the CLI structure using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{Config, EngineKind};
use crate::error::Result;

/// Instruction used by `process` when none is given.
pub const DEFAULT_INSTRUCTION: &str = "Summarize this document.";

/// local-llm: run a language model locally.
///
/// Streaming chat and chunked analysis of documents larger than the
/// model's context window.
#[derive(Parser, Debug)]
#[command(name = "local-llm")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to a JSON configuration file.
    ///
    /// Falls back to `LOCAL_LLM_CONFIG`, then the platform config directory.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Inference engine.
    #[arg(long, global = true, env = "LOCAL_LLM_ENGINE", value_enum)]
    pub engine: Option<EngineKind>,

    /// Engine address (Ollama).
    #[arg(long, global = true, env = "LOCAL_LLM_HOST")]
    pub host: Option<String>,

    /// Model identifier.
    #[arg(short, long, global = true, env = "LOCAL_LLM_MODEL")]
    pub model: Option<String>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, default_value = "text", global = true)]
    pub format: String,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Chat with the model.
    ///
    /// With a message, prints one streamed reply. Without one, starts an
    /// interactive session that keeps history until EOF or `/exit`.
    Chat {
        /// Message to send.
        message: Option<String>,
    },

    /// Analyze a plain-text document, chunk by chunk.
    Process {
        /// Path to the document.
        file: PathBuf,

        /// What to do with the document.
        #[arg(short, long, default_value = DEFAULT_INSTRUCTION)]
        instruction: String,

        /// Follow-up questions answered from the cached summaries.
        #[arg(long = "follow-up", value_name = "QUESTION")]
        follow_up: Vec<String>,
    },

    /// Show how a document would be chunked, without a model.
    Chunks {
        /// Path to the document.
        file: PathBuf,

        /// Preview length per chunk, in characters.
        #[arg(long, default_value = "40")]
        preview_len: usize,
    },

    /// Print the effective configuration.
    Config,
}

impl Cli {
    /// Loads the configuration file and applies flag overrides.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the file is invalid or the
    /// overrides make it inconsistent.
    pub fn effective_config(&self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;
        self.apply_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Applies `--engine`, `--host` and `--model` to `config`.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(kind) = self.engine {
            config.engine.kind = kind;
        }
        if let Some(ref host) = self.host {
            config.engine.host.clone_from(host);
        }
        if let Some(ref model) = self.model {
            config.engine.default_model.clone_from(model);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parse() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_process_arguments() {
        let cli = Cli::try_parse_from([
            "local-llm",
            "process",
            "report.txt",
            "--follow-up",
            "Who?",
            "--follow-up",
            "When?",
        ])
        .unwrap();

        let Commands::Process {
            file,
            instruction,
            follow_up,
        } = cli.command
        else {
            unreachable!("parsed as process");
        };
        assert_eq!(file, PathBuf::from("report.txt"));
        assert_eq!(instruction, DEFAULT_INSTRUCTION);
        assert_eq!(follow_up, vec!["Who?", "When?"]);
    }

    #[test]
    fn test_overrides_apply() {
        let cli = Cli::try_parse_from([
            "local-llm",
            "--engine",
            "scripted",
            "--host",
            "http://gpu-box:11434",
            "-m",
            "qwen2.5:7b",
            "config",
        ])
        .unwrap();

        let mut config = Config::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.engine.kind, EngineKind::Scripted);
        assert_eq!(config.engine.host, "http://gpu-box:11434");
        assert_eq!(config.engine.default_model, "qwen2.5:7b");
    }

    #[test]
    fn test_unknown_engine_rejected() {
        assert!(Cli::try_parse_from(["local-llm", "--engine", "llamacpp", "config"]).is_err());
    }
}
