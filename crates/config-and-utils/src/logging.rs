//! Logging initialization.
//!
//! Thin wrapper over the observability crate so binaries only pass a level.

use observability::LogConfig;
use std::path::PathBuf;

/// Initialize the logging system.
///
/// - Structured JSONL output to `VIGIL_LOG_PATH` or `~/.vigil/logs/vigil.jsonl`
/// - Log level from RUST_LOG env var or the provided default
/// - Human-readable stderr output unless `VIGIL_LOG_STDERR=0`
pub fn init_logging(level: &str) {
    let log_path = std::env::var("VIGIL_LOG_PATH")
        .ok()
        .and_then(non_empty_env)
        .map(PathBuf::from);

    let also_stderr = std::env::var("VIGIL_LOG_STDERR")
        .ok()
        .and_then(non_empty_env)
        .map(|raw| !matches!(raw.to_ascii_lowercase().as_str(), "0" | "false" | "off"))
        .unwrap_or(true);

    observability::init_with_config(LogConfig {
        service_name: "vigil".into(),
        default_level: parse_level(level).to_string().to_lowercase(),
        log_path,
        also_stderr,
    });
}

fn non_empty_env(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_level_all_variants() {
        assert_eq!(parse_level("trace"), tracing::Level::TRACE);
        assert_eq!(parse_level("debug"), tracing::Level::DEBUG);
        assert_eq!(parse_level("info"), tracing::Level::INFO);
        assert_eq!(parse_level("warn"), tracing::Level::WARN);
        assert_eq!(parse_level("warning"), tracing::Level::WARN);
        assert_eq!(parse_level("error"), tracing::Level::ERROR);
    }

    #[test]
    fn parse_level_case_insensitive() {
        assert_eq!(parse_level("Debug"), tracing::Level::DEBUG);
        assert_eq!(parse_level("WARNING"), tracing::Level::WARN);
    }

    #[test]
    fn parse_level_unknown_defaults_to_info() {
        assert_eq!(parse_level(""), tracing::Level::INFO);
        assert_eq!(parse_level("verbose"), tracing::Level::INFO);
    }

    #[test]
    fn non_empty_env_trims() {
        assert_eq!(non_empty_env("  ".to_string()), None);
        assert_eq!(non_empty_env(" /tmp/x ".to_string()), Some("/tmp/x".to_string()));
    }
}
