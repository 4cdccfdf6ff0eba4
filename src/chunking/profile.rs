//! Model size profiles.
//!
//! Smaller models tolerate larger chunks relative to their window, so the
//! base chunk size is scaled by a multiplier derived from the parameter
//! count hinted in the model identifier (`llama3.2:1b`, `qwen2.5-7b`,
//! `Llama-3.2-3B-Instruct-Q4_K_M.gguf`).

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

/// Chunk size scaling for a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ModelProfile {
    /// Parameter count in billions, when the identifier carries one.
    pub parameters_b: Option<f64>,
    /// Multiplier applied to the base chunk size.
    pub multiplier: f64,
}

impl Default for ModelProfile {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

impl ModelProfile {
    /// Profile used when the identifier has no size hint.
    pub const UNKNOWN: Self = Self {
        parameters_b: None,
        multiplier: 1.0,
    };

    /// Derives the profile from a model identifier.
    ///
    /// # Examples
    ///
    /// ```
    /// use local_llm::chunking::ModelProfile;
    ///
    /// assert_eq!(ModelProfile::for_model("llama3.2:1b").multiplier, 1.3);
    /// assert_eq!(ModelProfile::for_model("mistral").multiplier, 1.0);
    /// ```
    #[must_use]
    pub fn for_model(model_id: &str) -> Self {
        parameter_hint(model_id).map_or(Self::UNKNOWN, Self::for_parameters)
    }

    /// Builds the profile for a known parameter count (billions).
    #[must_use]
    pub fn for_parameters(billions: f64) -> Self {
        let multiplier = if billions <= 1.5 {
            1.3
        } else if billions <= 4.0 {
            1.15
        } else if billions < 13.0 {
            1.0
        } else {
            0.85
        };
        Self {
            parameters_b: Some(billions),
            multiplier,
        }
    }
}

fn parameter_hint(model_id: &str) -> Option<f64> {
    static SIZE_HINT: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::expect_used)]
    let re = SIZE_HINT.get_or_init(|| {
        Regex::new(r"(?i)(?:^|[^a-z0-9.])(\d+(?:\.\d+)?)b(?:[^a-z]|$)").expect("valid regex")
    });

    re.captures_iter(model_id)
        .filter_map(|caps| caps.get(1)?.as_str().parse::<f64>().ok())
        .find(|b| *b > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("llama3.2:1b", 1.3 ; "ollama tag 1b")]
    #[test_case("Llama-3.2-1B-Instruct-Q4_K_M.gguf", 1.3 ; "gguf file 1b")]
    #[test_case("qwen2.5:0.5b", 1.3 ; "half billion")]
    #[test_case("llama3.2:3b", 1.15 ; "ollama tag 3b")]
    #[test_case("gemma2:2b", 1.15 ; "two billion")]
    #[test_case("mistral-7b-instruct", 1.0 ; "seven billion")]
    #[test_case("llama3.1:8b", 1.0 ; "eight billion")]
    #[test_case("llama2:13b", 0.85 ; "thirteen billion")]
    #[test_case("mixtral:70b", 0.85 ; "seventy billion")]
    #[test_case("phi3:mini", 1.0 ; "no hint")]
    #[test_case("scripted-model", 1.0 ; "scripted")]
    fn test_for_model(id: &str, expected: f64) {
        let profile = ModelProfile::for_model(id);
        assert!((profile.multiplier - expected).abs() < f64::EPSILON);
    }

    #[test]
    fn test_version_numbers_are_not_sizes() {
        // "3.2" is a version, only the "1b" suffix is a size
        let profile = ModelProfile::for_model("llama3.2-1b");
        assert_eq!(profile.parameters_b, Some(1.0));
    }

    #[test]
    fn test_unknown_profile() {
        let profile = ModelProfile::for_model("");
        assert_eq!(profile, ModelProfile::UNKNOWN);
    }
}
