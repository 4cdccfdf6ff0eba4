//! Tracing subscriber setup for the binary.

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "LOCAL_LLM_LOG";

/// Builds the log filter.
///
/// `LOCAL_LLM_LOG` wins over `RUST_LOG`; without either the level is
/// `warn`, or `debug` for this crate when `verbose` is set.
#[must_use]
pub fn env_filter(verbose: bool) -> EnvFilter {
    let fallback = if verbose { "warn,local_llm=debug" } else { "warn" };
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Installs the global subscriber, writing to stderr.
///
/// Stdout stays reserved for command output. Calling this twice is
/// harmless; the second call is ignored.
pub fn init_logging(verbose: bool) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbose))
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        init_logging(false);
        init_logging(true);
    }

    #[test]
    fn test_filter_builds() {
        let filter = env_filter(true);
        assert!(!filter.to_string().is_empty());
    }
}
