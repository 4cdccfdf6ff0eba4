//! Configuration file and effective settings.
//!
//! Settings come from a JSON file; every section falls back to defaults,
//! so an empty object (or no file at all) is a valid configuration. The
//! file is looked up in this order:
//!
//! 1. An explicit path (`--config`)
//! 2. `LOCAL_LLM_CONFIG`
//! 3. `<config_dir>/local-llm/config.json`, if it exists
//!
//! Command-line flags are applied on top by the CLI.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::chunking::ChunkSizing;
use crate::error::{Error, Result};
use crate::generation::GenerationConfig;
use crate::pipeline::PipelineConfig;
use crate::runtime::RuntimeConfig;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "LOCAL_LLM_CONFIG";

/// Default Ollama address.
pub const DEFAULT_HOST: &str = "http://localhost:11434";

/// Default model identifier.
pub const DEFAULT_MODEL: &str = "llama3.2:3b";

/// Inference engine selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Local Ollama server.
    #[default]
    Ollama,
    /// Deterministic in-process engine.
    Scripted,
}

impl EngineKind {
    /// Engine name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::Scripted => "scripted",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "scripted" => Ok(Self::Scripted),
            other => Err(Error::Config {
                message: format!("unknown engine: {other}"),
            }),
        }
    }
}

/// Engine connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Which engine to drive.
    pub kind: EngineKind,
    /// Engine address (Ollama only).
    pub host: String,
    /// Model loaded when none is resident.
    pub default_model: String,
    /// Per-request HTTP read timeout, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: EngineKind::default(),
            host: DEFAULT_HOST.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            request_timeout_secs: 120,
        }
    }
}

impl EngineConfig {
    /// HTTP read timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Complete configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Engine selection and connection.
    pub engine: EngineConfig,
    /// Runtime limits.
    pub runtime: RuntimeConfig,
    /// Chat prompt settings.
    pub generation: GenerationConfig,
    /// Chunk size bounds.
    pub chunking: ChunkSizing,
    /// Document pipeline settings.
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Loads configuration following the lookup order above.
    ///
    /// # Arguments
    ///
    /// * `path` - Explicit file path; takes precedence over everything.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if an explicitly named file is missing,
    /// cannot be parsed, or fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        let config = match explicit {
            Some(path) => Self::from_file(&path)?,
            None => match default_path() {
                Some(path) if path.is_file() => Self::from_file(&path)?,
                _ => {
                    debug!("no configuration file, using defaults");
                    Self::default()
                }
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Reads and parses one file without validating it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("cannot read {}: {e}", path.display()),
        })?;
        let config = serde_json::from_str(&text).map_err(|e| Error::Config {
            message: format!("invalid configuration in {}: {e}", path.display()),
        })?;
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Rejects inconsistent settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first offending setting, or a
    /// chunking error for invalid chunk bounds.
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;

        if self.engine.default_model.trim().is_empty() {
            return Err(invalid("engine.default_model must not be empty"));
        }
        if self.engine.kind == EngineKind::Ollama && self.engine.host.trim().is_empty() {
            return Err(invalid("engine.host must not be empty"));
        }
        if self.runtime.load_timeout_secs == 0 || self.runtime.generation_timeout_secs == 0 {
            return Err(invalid("runtime timeouts must be > 0"));
        }
        if self.runtime.turn_threshold == 0 {
            return Err(invalid("runtime.turn_threshold must be > 0"));
        }
        if self.runtime.stale_guard_secs < self.runtime.load_timeout_secs {
            return Err(invalid(
                "runtime.stale_guard_secs must not be shorter than the load timeout",
            ));
        }
        if self.generation.max_prompt_chars == 0 {
            return Err(invalid("generation.max_prompt_chars must be > 0"));
        }
        if self.pipeline.chunk_prompt_chars <= self.chunking.max {
            return Err(invalid(format!(
                "pipeline.chunk_prompt_chars ({}) must exceed chunking.max ({})",
                self.pipeline.chunk_prompt_chars, self.chunking.max
            )));
        }

        let synthesis = &self.pipeline.synthesis;
        if synthesis.max_summaries == 0 {
            return Err(invalid("pipeline.synthesis.max_summaries must be > 0"));
        }
        if synthesis.min_summary_chars == 0
            || synthesis.min_summary_chars > synthesis.per_summary_chars
        {
            return Err(invalid(
                "pipeline.synthesis.min_summary_chars must be between 1 and per_summary_chars",
            ));
        }
        if self.pipeline.cache_ttl_secs == 0 {
            return Err(invalid("pipeline.cache_ttl_secs must be > 0"));
        }
        Ok(())
    }
}

/// Default configuration file location, if the platform has one.
#[must_use]
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("local-llm").join("config.json"))
}

fn invalid(message: impl Into<String>) -> Error {
    Error::Config {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(json: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.host, DEFAULT_HOST);
        assert_eq!(config.runtime.turn_threshold, 50);
        assert_eq!(config.pipeline.chunk_prompt_chars, 6000);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let file = write_config(r#"{"engine": {"kind": "scripted"}, "chunking": {"base": 1500}}"#);
        let config = Config::load(Some(file.path())).unwrap();

        assert_eq!(config.engine.kind, EngineKind::Scripted);
        assert_eq!(config.engine.default_model, DEFAULT_MODEL);
        assert_eq!(config.chunking.base, 1500);
        assert_eq!(config.chunking.max, 4000);
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = Config::load(Some(Path::new("/nonexistent/local-llm.json"))).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_malformed_file() {
        let file = write_config("{ not json");
        assert!(Config::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_validation_rejects_small_chunk_ceiling() {
        let mut config = Config::default();
        config.pipeline.chunk_prompt_chars = 3000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_inverted_chunk_bounds() {
        let mut config = Config::default();
        config.chunking.min = 5000;
        assert!(matches!(config.validate(), Err(Error::Chunking(_))));
    }

    #[test]
    fn test_engine_kind_from_str() {
        assert_eq!("Ollama".parse::<EngineKind>().unwrap(), EngineKind::Ollama);
        assert_eq!("scripted".parse::<EngineKind>().unwrap(), EngineKind::Scripted);
        assert!("llamacpp".parse::<EngineKind>().is_err());
        assert_eq!(EngineKind::Scripted.to_string(), "scripted");
    }

    #[test]
    fn test_round_trip_through_json() {
        let json = serde_json::to_string(&Config::default()).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, Config::default());
    }
}
