//! Configuration management for Tollgate.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{Result, TollgateError};
use crate::ratelimit::PolicySet;

/// Prefix for environment variable overrides, e.g.
/// `TOLLGATE__CLEANUP__INTERVAL_SECS=600`.
pub const ENV_PREFIX: &str = "TOLLGATE";

/// Main configuration for Tollgate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Idle state eviction
    #[serde(default)]
    pub cleanup: CleanupConfig,

    /// Rate limit policies
    #[serde(default)]
    pub policies: PolicySet,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Cleanup task configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Seconds between cleanup passes
    #[serde(default = "default_cleanup_interval")]
    pub interval_secs: u64,

    /// Entries idle for longer than this many milliseconds are evicted
    #[serde(default = "default_max_age")]
    pub max_age_ms: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_cleanup_interval(),
            max_age_ms: default_max_age(),
        }
    }
}

impl CleanupConfig {
    /// Time between cleanup passes.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Idle time after which state is evicted.
    pub fn max_age(&self) -> Duration {
        Duration::from_millis(self.max_age_ms)
    }
}

fn default_cleanup_interval() -> u64 {
    3600
}

fn default_max_age() -> u64 {
    3_600_000
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TollgateConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TollgateConfig =
            serde_yaml::from_str(yaml).map_err(|e| TollgateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional YAML file, overridden by
    /// `TOLLGATE__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(::config::File::from(path).format(::config::FileFormat::Yaml));
        }

        let config: TollgateConfig = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the limiter cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.cleanup.interval_secs == 0 {
            return Err(TollgateError::Config(
                "cleanup.interval_secs must be greater than zero".to_string(),
            ));
        }
        self.policies.validate()?;

        // Cleanup prunes window logs against max_age, so anything shorter
        // than a window would drop timestamps that still count.
        for (name, limits) in self.policies.iter() {
            if self.cleanup.max_age_ms < limits.window_ms {
                return Err(TollgateError::Config(format!(
                    "cleanup.max_age_ms ({}) is shorter than the window of policy '{}' ({})",
                    self.cleanup.max_age_ms, name, limits.window_ms
                )));
            }
            if self.cleanup.max_age_ms < limits.refill_time_ms() {
                warn!(
                    policy = name,
                    max_age_ms = self.cleanup.max_age_ms,
                    refill_time_ms = limits.refill_time_ms(),
                    "Idle buckets may be evicted before they refill"
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_defaults() {
        let config = TollgateConfig::default();
        assert_eq!(config.cleanup.interval(), Duration::from_secs(3600));
        assert_eq!(config.cleanup.max_age(), Duration::from_secs(3600));
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(config.policies.policies.is_empty());
        assert_ok!(config.validate());
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
cleanup:
  interval_secs: 600
logging:
  format: json
policies:
  default:
    max_requests: 500
  policies:
    auth:
      max_tokens: 3
      window_ms: 900000
"#;
        let config = assert_ok!(TollgateConfig::from_yaml(yaml));

        assert_eq!(config.cleanup.interval_secs, 600);
        assert_eq!(config.cleanup.max_age_ms, 3_600_000);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.policies.default.max_requests, 500);
        assert_eq!(config.policies.get("auth").max_tokens, 3);
    }

    #[test]
    fn test_zero_cleanup_interval_rejected() {
        assert_err!(TollgateConfig::from_yaml("cleanup:\n  interval_secs: 0\n"));
    }

    #[test]
    fn test_max_age_must_cover_every_window() {
        let yaml = r#"
cleanup:
  max_age_ms: 600000
policies:
  policies:
    auth:
      window_ms: 900000
"#;
        let err = assert_err!(TollgateConfig::from_yaml(yaml));
        assert!(err.to_string().contains("auth"));

        // The default policy's 60s window counts too.
        assert_err!(TollgateConfig::from_yaml("cleanup:\n  max_age_ms: 5000\n"));
        assert_ok!(TollgateConfig::from_yaml("cleanup:\n  max_age_ms: 60000\n"));
    }

    #[test]
    fn test_missing_file() {
        let err = assert_err!(TollgateConfig::from_file("/nonexistent/tollgate.yaml"));
        assert!(matches!(err, TollgateError::Io(_)));
    }

    #[test]
    fn test_load_layers_file_and_environment() {
        let path = std::env::temp_dir().join(format!("tollgate-config-{}.yaml", std::process::id()));
        std::fs::write(
            &path,
            "cleanup:\n  interval_secs: 120\npolicies:\n  policies:\n    api:\n      max_tokens: 40\n",
        )
        .unwrap();

        std::env::set_var("TOLLGATE__CLEANUP__MAX_AGE_MS", "90000");
        let config = TollgateConfig::load(Some(path.as_path()));
        std::env::remove_var("TOLLGATE__CLEANUP__MAX_AGE_MS");
        std::fs::remove_file(&path).unwrap();

        let config = assert_ok!(config);
        assert_eq!(config.cleanup.interval_secs, 120);
        assert_eq!(config.cleanup.max_age_ms, 90_000);
        assert_eq!(config.policies.get("api").max_tokens, 40);
        assert_eq!(config.policies.get("api").max_requests, 100);
    }
}
