use std::env;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Default config file probed in the working directory when no explicit
/// path is given.
pub const DEFAULT_CONFIG_FILE: &str = "clausecheck.toml";

/// Environment variable overriding the configured base URL.
pub const API_URL_ENV: &str = "CLAUSECHECK_API_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Endpoint and timeout configuration for the [`crate::api::ApiClient`].
///
/// Loaded from a TOML file with every field optional, then overridden by
/// `CLAUSECHECK_API_URL` when set. Timeouts are wall-clock, per-call and
/// non-renewable.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the analysis service, without a trailing path.
    pub base_url: String,
    pub connect_timeout_secs: u64,
    pub analyze_timeout_secs: u64,
    pub explain_timeout_secs: u64,
    pub extract_timeout_secs: u64,
    pub redline_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            base_url: "http://localhost:8000".to_string(),
            connect_timeout_secs: 10,
            analyze_timeout_secs: 60,
            explain_timeout_secs: 30,
            extract_timeout_secs: 30,
            redline_timeout_secs: 60,
        }
    }
}

impl ApiConfig {
    /// Load configuration.
    ///
    /// An explicit `path` must exist and parse. With no path, the default
    /// file is used when present, else built-in defaults. The env override
    /// is applied last in both cases.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => toml::from_str(&std::fs::read_to_string(p)?)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    toml::from_str(&std::fs::read_to_string(default)?)?
                } else {
                    ApiConfig::default()
                }
            }
        };
        if let Ok(url) = env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                config.base_url = url;
            }
        }
        Ok(config)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn analyze_timeout(&self) -> Duration {
        Duration::from_secs(self.analyze_timeout_secs)
    }

    pub fn explain_timeout(&self) -> Duration {
        Duration::from_secs(self.explain_timeout_secs)
    }

    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.extract_timeout_secs)
    }

    pub fn redline_timeout(&self) -> Duration {
        Duration::from_secs(self.redline_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts_match_contract() {
        let config = ApiConfig::default();
        assert_eq!(config.analyze_timeout(), Duration::from_secs(60));
        assert_eq!(config.explain_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let config: ApiConfig =
            toml::from_str("base_url = \"https://api.example.com\"").expect("parse");
        assert_eq!(config.base_url, "https://api.example.com");
        assert_eq!(config.analyze_timeout_secs, 60);
        assert_eq!(config.connect_timeout_secs, 10);
    }

    #[test]
    fn test_full_toml_overrides_everything() {
        let toml = r#"
            base_url = "https://contracts.internal"
            connect_timeout_secs = 5
            analyze_timeout_secs = 120
            explain_timeout_secs = 15
            extract_timeout_secs = 45
            redline_timeout_secs = 90
        "#;
        let config: ApiConfig = toml::from_str(toml).expect("parse");
        assert_eq!(config.base_url, "https://contracts.internal");
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.analyze_timeout(), Duration::from_secs(120));
        assert_eq!(config.explain_timeout(), Duration::from_secs(15));
        assert_eq!(config.extract_timeout(), Duration::from_secs(45));
        assert_eq!(config.redline_timeout(), Duration::from_secs(90));
    }

    #[test]
    fn test_empty_toml_is_all_defaults() {
        let config: ApiConfig = toml::from_str("").expect("parse");
        assert_eq!(config, ApiConfig::default());
    }

    #[test]
    fn test_unknown_keys_are_rejected_gracefully() {
        // serde(default) does not imply deny_unknown_fields; stray keys are
        // tolerated so older config files keep working.
        let config: ApiConfig =
            toml::from_str("retired_option = true").expect("parse");
        assert_eq!(config.base_url, ApiConfig::default().base_url);
    }
}
