//! Configuration management for vendpoint usage analytics

use crate::aggregate::NonNumericPolicy;
use crate::series::LabelZone;
use crate::span::Span;
use serde::{Deserialize, Serialize};
use std::path::Path;
use validator::Validate;

/// Environment variable prefix, e.g. `VENDPOINT_API__BASE_URL`
pub const ENV_PREFIX: &str = "VENDPOINT";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct Config {
    /// Admin API configuration
    #[serde(default)]
    #[validate(nested)]
    pub api: ApiConfig,

    /// Chart configuration
    #[serde(default)]
    pub chart: ChartConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Admin API configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ApiConfig {
    /// Base URL of the validator endpoint API
    #[serde(default = "default_base_url")]
    #[validate(url)]
    pub base_url: String,

    /// Session token sent as a bearer token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    #[validate(range(min = 1, max = 600))]
    pub timeout_secs: u64,

    /// Maximum records fetched per log query
    #[serde(default = "default_max_records")]
    #[validate(range(min = 1))]
    pub max_records: u32,
}

/// Chart configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartConfig {
    /// Bucket width
    #[serde(default = "default_granularity")]
    pub granularity: Span,

    /// Look-back window
    #[serde(default = "default_history")]
    pub history: Span,

    /// Handling of non-numeric value fields
    #[serde(default)]
    pub on_non_numeric: NonNumericPolicy,

    /// Zone used for axis labels
    #[serde(default)]
    pub timezone: LabelZone,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json or pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_max_records() -> u32 {
    10_000
}

const fn default_granularity() -> Span {
    Span::DEFAULT_GRANULARITY
}

const fn default_history() -> Span {
    Span::DEFAULT_HISTORY
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
            timeout_secs: default_timeout_secs(),
            max_records: default_max_records(),
        }
    }
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            granularity: default_granularity(),
            history: default_history(),
            on_non_numeric: NonNumericPolicy::default(),
            timezone: LabelZone::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from files and environment
    ///
    /// Sources, lowest precedence first: `vendpoint.{toml,yaml,json}` in the
    /// working directory, the explicit `path`, then `VENDPOINT_*` variables
    /// with `__` separating sections.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or parsed, or if the
    /// result fails validation.
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("vendpoint").required(false));
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: Self = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.check()?;
        Ok(config)
    }

    /// Validate loaded values
    ///
    /// # Errors
    ///
    /// Returns a configuration error describing every invalid field.
    pub fn check(&self) -> crate::Result<()> {
        self.validate()
            .map_err(|e| crate::Error::configuration(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::missing_panics_doc)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_config_default() {
        let config = Config::default();

        assert_eq!(config.api.base_url, "http://localhost:8000");
        assert!(config.api.token.is_none());
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.api.max_records, 10_000);
        assert_eq!(config.chart.granularity.as_secs(), 3_600);
        assert_eq!(config.chart.history.as_secs(), 604_800);
        assert_eq!(config.chart.on_non_numeric, NonNumericPolicy::Reject);
        assert_eq!(config.chart.timezone, LabelZone::Utc);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "pretty");
        assert!(config.check().is_ok());
    }

    #[test]
    fn test_partial_config_deserialization() {
        let json_str = r#"{
            "api": {"base_url": "https://vendpoint.example.com", "token": "abc"},
            "chart": {"granularity": "6h", "on_non_numeric": "skip"}
        }"#;

        let config: Config = serde_json::from_str(json_str).unwrap();

        assert_eq!(config.api.base_url, "https://vendpoint.example.com");
        assert_eq!(config.api.token.as_deref(), Some("abc"));
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.chart.granularity.as_secs(), 21_600);
        assert_eq!(config.chart.history, Span::DEFAULT_HISTORY);
        assert_eq!(config.chart.on_non_numeric, NonNumericPolicy::Skip);
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_invalid_span_rejected() {
        let result = serde_json::from_str::<Config>(r#"{"chart": {"history": "forever"}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.api.base_url = "not a url".to_string();
        assert!(config.check().is_err());

        let mut config = Config::default();
        config.api.max_records = 0;
        assert!(config.check().is_err());

        let mut config = Config::default();
        config.api.timeout_secs = 0;
        assert!(config.check().is_err());
    }

    #[test]
    fn test_token_not_serialized_when_absent() {
        let serialized = serde_json::to_string(&Config::default()).unwrap();
        assert!(!serialized.contains("token"));
        assert!(serialized.contains("\"granularity\":\"PT1H\""));
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[api]\nbase_url = \"http://10.0.0.5:8000\"\nmax_records = 250\n\n[chart]\nhistory = \"P1D\"\ntimezone = \"local\""
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();

        assert_eq!(config.api.base_url, "http://10.0.0.5:8000");
        assert_eq!(config.api.max_records, 250);
        assert_eq!(config.chart.history, Span::DAY);
        assert_eq!(config.chart.timezone, LabelZone::Local);
    }

    #[test]
    fn test_load_rejects_invalid_file_values() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[api]\nmax_records = 0").unwrap();

        assert!(Config::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let result = Config::load(Some(Path::new("/nonexistent/vendpoint.toml")));
        assert!(result.is_err());
    }
}
