//! Configuration types for the Kafka test harness.
//!
//! Configuration is loaded from YAML files and validated before use. Every
//! field has a default, so an empty document is a valid configuration.

use std::path::Path;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Root configuration for the harness.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HarnessConfig {
    /// Ephemeral broker configuration.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Defaults applied when deriving producer/consumer settings.
    #[serde(default)]
    pub clients: ClientDefaults,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Ephemeral broker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerConfig {
    /// Kafka image tag to run instead of the module's default.
    /// Supports environment variable expansion: "${KAFKA_IMAGE_TAG}"
    pub image_tag: Option<String>,

    /// How long to wait for the broker to answer a metadata request.
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,

    /// Partition count for auto-created topics.
    #[serde(default = "default_partitions")]
    pub default_partitions: i32,

    /// Host clients use to reach the broker's mapped port.
    #[serde(default = "default_broker_host")]
    pub host: String,
}

/// Defaults for producer and consumer settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ClientDefaults {
    /// Request timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Consumer poll interval in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Consumer offset commit interval in milliseconds.
    #[serde(default = "default_commit_interval_ms")]
    pub commit_interval_ms: u64,

    /// Metadata refresh age for consumers, in milliseconds.
    #[serde(default = "default_metadata_max_age_ms")]
    pub metadata_max_age_ms: u64,

    /// Upper bound on records returned from a single poll.
    #[serde(default = "default_max_poll_records")]
    pub max_poll_records: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

// Default value functions

fn default_startup_timeout_ms() -> u64 {
    60_000
}

fn default_partitions() -> i32 {
    1
}

fn default_broker_host() -> String {
    // Avoid IPv6 resolution issues with mapped container ports
    "127.0.0.1".to_string()
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_commit_interval_ms() -> u64 {
    250
}

fn default_metadata_max_age_ms() -> u64 {
    100
}

fn default_max_poll_records() -> usize {
    500
}

fn default_log_level() -> String {
    "info".to_string()
}

// Default implementations

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            image_tag: None,
            startup_timeout_ms: default_startup_timeout_ms(),
            default_partitions: default_partitions(),
            host: default_broker_host(),
        }
    }
}

impl Default for ClientDefaults {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            commit_interval_ms: default_commit_interval_ms(),
            metadata_max_age_ms: default_metadata_max_age_ms(),
            max_poll_records: default_max_poll_records(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl BrokerConfig {
    /// Startup window as a [`Duration`].
    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    /// Image tag with environment variables expanded.
    #[must_use]
    pub fn image_tag(&self) -> Option<String> {
        self.image_tag
            .as_deref()
            .map(expand_env_vars)
            .filter(|tag| !tag.is_empty())
    }
}

impl ClientDefaults {
    /// Request timeout as a [`Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Poll interval as a [`Duration`].
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Commit interval as a [`Duration`].
    #[must_use]
    pub fn commit_interval(&self) -> Duration {
        Duration::from_millis(self.commit_interval_ms)
    }

    /// Validate the client defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if any timeout or interval is zero.
    pub fn validate(&self) -> ConfigResult<()> {
        let durations = [
            ("request_timeout_ms", self.request_timeout_ms),
            ("poll_interval_ms", self.poll_interval_ms),
            ("commit_interval_ms", self.commit_interval_ms),
            ("metadata_max_age_ms", self.metadata_max_age_ms),
        ];
        for (field, value) in durations {
            if value == 0 {
                return Err(ConfigError::ZeroDuration { field });
            }
        }
        if self.max_poll_records == 0 {
            return Err(ConfigError::ZeroDuration {
                field: "max_poll_records",
            });
        }
        Ok(())
    }
}

/// Expand environment variables in a string.
///
/// Replaces `${VAR_NAME}` with the value of the environment variable `VAR_NAME`.
/// If the variable is not set, replaces with an empty string.
fn expand_env_vars(s: &str) -> String {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex");
    re.replace_all(s, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .to_string()
}

// Configuration loading and validation

impl HarnessConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if
    /// validation fails.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::from_str(&content)
    }

    /// Load configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing or validation fails.
    pub fn from_str(content: &str) -> ConfigResult<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation check fails.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.broker.startup_timeout_ms == 0 {
            return Err(ConfigError::ZeroDuration {
                field: "startup_timeout_ms",
            });
        }
        if self.broker.default_partitions < 1 {
            return Err(ConfigError::InvalidPartitionCount(
                self.broker.default_partitions,
            ));
        }
        self.clients.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_passes_validation() {
        assert!(HarnessConfig::default().validate().is_ok());
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = HarnessConfig::from_str("{}").unwrap();
        assert_eq!(config.clients.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.clients.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.clients.commit_interval(), Duration::from_millis(250));
        assert_eq!(config.clients.metadata_max_age_ms, 100);
        assert_eq!(config.broker.default_partitions, 1);
        assert_eq!(config.broker.host, "127.0.0.1");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_from_yaml_string() {
        let yaml = r"
broker:
  startup_timeout_ms: 30000
  default_partitions: 3
clients:
  poll_interval_ms: 100
logging:
  level: debug
  json: true
";
        let config = HarnessConfig::from_str(yaml).unwrap();
        assert_eq!(config.broker.startup_timeout(), Duration::from_secs(30));
        assert_eq!(config.broker.default_partitions, 3);
        assert_eq!(config.clients.poll_interval_ms, 100);
        // untouched fields keep their defaults
        assert_eq!(config.clients.commit_interval_ms, 250);
        assert!(config.logging.json);
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let yaml = r"
clients:
  poll_interval_ms: 0
";
        let result = HarnessConfig::from_str(yaml);
        assert!(matches!(
            result,
            Err(ConfigError::ZeroDuration {
                field: "poll_interval_ms"
            })
        ));
    }

    #[test]
    fn test_zero_partitions_rejected() {
        let mut config = HarnessConfig::default();
        config.broker.default_partitions = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPartitionCount(0))
        ));
    }

    #[test]
    fn test_image_tag_env_expansion() {
        std::env::set_var("TEST_HARNESS_KAFKA_TAG", "7.6.1");
        let config = BrokerConfig {
            image_tag: Some("${TEST_HARNESS_KAFKA_TAG}".to_string()),
            ..BrokerConfig::default()
        };
        assert_eq!(config.image_tag().as_deref(), Some("7.6.1"));
        std::env::remove_var("TEST_HARNESS_KAFKA_TAG");
    }

    #[test]
    fn test_image_tag_missing_var_is_none() {
        let config = BrokerConfig {
            image_tag: Some("${NONEXISTENT_HARNESS_VAR}".to_string()),
            ..BrokerConfig::default()
        };
        assert_eq!(config.image_tag(), None);
    }

    #[test]
    fn test_missing_file_reports_path() {
        let result = HarnessConfig::from_file("/nonexistent/harness.yaml");
        match result {
            Err(ConfigError::IoError { path, .. }) => assert!(path.contains("harness.yaml")),
            other => panic!("expected IoError, got {other:?}"),
        }
    }
}
