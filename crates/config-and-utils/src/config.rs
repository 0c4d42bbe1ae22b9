//! Configuration management.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default Supabase URL (set at compile time via SUPABASE_URL env var).
///
/// Empty when not provided, which the health check reports as missing
/// configuration.
pub const DEFAULT_SUPABASE_URL: &str = match option_env!("SUPABASE_URL") {
    Some(url) => url,
    None => "",
};

/// Default Supabase publishable key (set at compile time via SUPABASE_PUBLISHABLE_KEY env var).
pub const DEFAULT_SUPABASE_PUBLISHABLE_KEY: &str = match option_env!("SUPABASE_PUBLISHABLE_KEY") {
    Some(key) => key,
    None => "",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Table read by the health check's connectivity probe.
pub const DEFAULT_HEALTH_PROBE_TABLE: &str = "profiles";

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Supabase project URL.
    #[serde(default = "default_supabase_url")]
    pub supabase_url: String,
    /// Supabase publishable API key (public, safe to expose).
    #[serde(default = "default_supabase_publishable_key")]
    pub supabase_publishable_key: String,
    /// Table used for the health check's trivial read.
    #[serde(default = "default_health_probe_table")]
    pub health_probe_table: String,
    /// Session resilience tuning.
    #[serde(default)]
    pub resilience: ResilienceSettings,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_supabase_url() -> String {
    DEFAULT_SUPABASE_URL.to_string()
}

fn default_supabase_publishable_key() -> String {
    DEFAULT_SUPABASE_PUBLISHABLE_KEY.to_string()
}

fn default_health_probe_table() -> String {
    DEFAULT_HEALTH_PROBE_TABLE.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            supabase_url: default_supabase_url(),
            supabase_publishable_key: default_supabase_publishable_key(),
            health_probe_table: default_health_probe_table(),
            resilience: ResilienceSettings::default(),
        }
    }
}

/// Timing and retry knobs for session handling.
///
/// Stored as plain integers so the JSON file stays readable; use the
/// `Duration` accessors in code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceSettings {
    /// Refresh proactively when less than this many seconds remain.
    pub refresh_threshold_secs: u64,
    /// On regaining visibility, refresh when less than this many seconds remain.
    pub visibility_refresh_window_secs: u64,
    /// Auth-failure retries per wrapped call.
    pub auth_max_retries: u32,
    /// Per-attempt timeout for generic backend queries.
    pub query_timeout_ms: u64,
    /// Retries for generic backend queries.
    pub query_max_retries: u32,
    /// Base delay for query backoff (doubles per attempt).
    pub query_base_delay_ms: u64,
    /// Timeout for each health check step.
    pub health_timeout_ms: u64,
    /// Attempts for a single token refresh on transient errors.
    pub refresh_max_retries: u32,
    /// First backoff delay between refresh attempts.
    pub refresh_initial_delay_ms: u64,
    /// Cap for the refresh backoff delay.
    pub refresh_max_delay_ms: u64,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            refresh_threshold_secs: 120,
            visibility_refresh_window_secs: 600,
            auth_max_retries: 1,
            query_timeout_ms: 15_000,
            query_max_retries: 2,
            query_base_delay_ms: 1_000,
            health_timeout_ms: 5_000,
            refresh_max_retries: 3,
            refresh_initial_delay_ms: 500,
            refresh_max_delay_ms: 5_000,
        }
    }
}

impl ResilienceSettings {
    pub fn refresh_threshold(&self) -> Duration {
        Duration::from_secs(self.refresh_threshold_secs)
    }

    pub fn visibility_refresh_window(&self) -> Duration {
        Duration::from_secs(self.visibility_refresh_window_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn query_base_delay(&self) -> Duration {
        Duration::from_millis(self.query_base_delay_ms)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file, falling back to defaults,
    /// then apply environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    fn load_from_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply `VIGIL_*` overrides from the given lookup. Blank values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(log_level) = lookup("VIGIL_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Some(url) = lookup("VIGIL_SUPABASE_URL") {
            self.supabase_url = url;
        }
        if let Some(key) = lookup("VIGIL_SUPABASE_PUBLISHABLE_KEY") {
            self.supabase_publishable_key = key;
        }
    }

    /// Check that the backend can be addressed at all.
    pub fn validate(&self) -> CoreResult<()> {
        if self.supabase_url.trim().is_empty() {
            return Err(CoreError::Config("supabase_url is not set".to_string()));
        }
        if self.supabase_publishable_key.trim().is_empty() {
            return Err(CoreError::Config(
                "supabase_publishable_key is not set".to_string(),
            ));
        }
        self.supabase_url()?;
        Ok(())
    }

    /// Get the Supabase URL as a parsed URL.
    pub fn supabase_url(&self) -> CoreResult<Url> {
        Url::parse(&self.supabase_url).map_err(CoreError::from)
    }

    /// The Supabase URL without a trailing slash, for building endpoint paths.
    pub fn supabase_base_url(&self) -> String {
        self.supabase_url.trim_end_matches('/').to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn configured() -> Config {
        Config {
            supabase_url: "https://abc123.supabase.co/".to_string(),
            supabase_publishable_key: "sb_publishable_test".to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.supabase_url, DEFAULT_SUPABASE_URL);
        assert_eq!(config.health_probe_table, DEFAULT_HEALTH_PROBE_TABLE);
        assert_eq!(config.resilience, ResilienceSettings::default());
    }

    #[test]
    fn test_resilience_defaults() {
        let settings = ResilienceSettings::default();
        assert_eq!(settings.refresh_threshold(), Duration::from_secs(120));
        assert_eq!(settings.visibility_refresh_window(), Duration::from_secs(600));
        assert_eq!(settings.query_timeout(), Duration::from_secs(15));
        assert_eq!(settings.query_base_delay(), Duration::from_secs(1));
        assert_eq!(settings.auth_max_retries, 1);
        assert_eq!(settings.query_max_retries, 2);
    }

    #[test]
    fn test_config_load_from_file_partial() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");

        let config_json = r#"{
            "log_level": "debug",
            "resilience": { "refresh_threshold_secs": 30 }
        }"#;
        std::fs::write(&config_path, config_json).unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.resilience.refresh_threshold_secs, 30);
        assert_eq!(config.resilience.visibility_refresh_window_secs, 600);
        assert_eq!(config.health_probe_table, DEFAULT_HEALTH_PROBE_TABLE);
    }

    #[test]
    fn test_config_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let mut config = configured();
        config.log_level = "trace".to_string();
        config.resilience.query_max_retries = 5;
        config.save(&paths).unwrap();

        let loaded = Config::load_from_file(&paths.config_file()).unwrap();
        assert_eq!(loaded.log_level, "trace");
        assert_eq!(loaded.supabase_url, "https://abc123.supabase.co/");
        assert_eq!(loaded.resilience.query_max_retries, 5);
    }

    #[test]
    fn test_config_load_nonexistent_uses_defaults() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config::load(&paths).unwrap();
        assert_eq!(config.health_probe_table, DEFAULT_HEALTH_PROBE_TABLE);
    }

    #[test]
    fn test_apply_overrides() {
        let env: HashMap<&str, &str> = [
            ("VIGIL_LOG_LEVEL", "warn"),
            ("VIGIL_SUPABASE_URL", "https://override.supabase.co"),
            ("VIGIL_SUPABASE_PUBLISHABLE_KEY", "   "),
        ]
        .into_iter()
        .collect();

        let mut config = configured();
        config.apply_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.log_level, "warn");
        assert_eq!(config.supabase_url, "https://override.supabase.co");
        assert_eq!(config.supabase_publishable_key, "sb_publishable_test");
    }

    #[test]
    fn test_validate() {
        assert!(configured().validate().is_ok());

        let mut missing_url = configured();
        missing_url.supabase_url = String::new();
        assert!(matches!(missing_url.validate(), Err(CoreError::Config(_))));

        let mut missing_key = configured();
        missing_key.supabase_publishable_key = " ".to_string();
        assert!(matches!(missing_key.validate(), Err(CoreError::Config(_))));

        let mut bad_url = configured();
        bad_url.supabase_url = "not a valid url".to_string();
        assert!(matches!(bad_url.validate(), Err(CoreError::InvalidUrl(_))));
    }

    #[test]
    fn test_supabase_base_url_trims_slash() {
        assert_eq!(configured().supabase_base_url(), "https://abc123.supabase.co");
    }
}
