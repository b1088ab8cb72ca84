//! Application configuration.
//!
//! Values are read from environment variables, after loading a `.env` file
//! when one is present.
//!
//! # Environment Variables
//!
//! - `DATABASE_URL`: Postgres connection string (required)
//! - `ANALYTICS_DATABASE_URL`: analytics Postgres (optional, default: `DATABASE_URL`)
//! - `REDIS_URL`: Redis connection string (required)
//! - `EVENT_TOPIC`: pub/sub topic (optional, default: `logger:good`)
//! - `CACHE_TTL_SECS`: cache entry TTL (optional, default: 60, minimum 1)
//! - `OPERATION_TIMEOUT_MS`: per-call service deadline (optional, default: 5000)
//! - `PUBLISH_POLICY`: `within-transaction` (default) | `after-commit`
//! - `BATCH_MAX_SIZE`: events per flush (optional, default: 100, `1..=5000`)
//! - `BATCH_MAX_WAIT_MS`: flush latency bound (optional, default: 1000)
//! - `BATCH_QUEUE_CAPACITY`: audit queue bound (optional, default: 1024)
//! - `FLUSH_TIMEOUT_MS`: sink timeout per flush (optional, default: 1000)
//! - `DATABASE_MAX_CONNECTIONS`: pool size (optional, default: 10)
//! - `LOG_FORMAT`: `plain` (default) | `json`

use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::application::{PublishPolicy, ServiceConfig};
use crate::infrastructure::GOOD_EVENTS_TOPIC;
use crate::worker::BatcherConfig;

/// Largest accepted `BATCH_MAX_SIZE`.
pub const MAX_BATCH_SIZE: usize = 5000;

/// Errors that can occur while loading configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "plain" | "text" | "pretty" => Ok(Self::Plain),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {value}")),
        }
    }
}

/// Configuration for the goods service and the audit worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub database_url: String,
    pub analytics_database_url: String,
    pub redis_url: String,
    pub event_topic: String,
    pub cache_ttl: Duration,
    pub operation_timeout: Duration,
    pub publish_policy: PublishPolicy,
    pub batch_max_size: usize,
    pub batch_max_wait: Duration,
    pub batch_queue_capacity: usize,
    pub flush_timeout: Duration,
    pub database_max_connections: u32,
    pub log_format: LogFormat,
}

impl AppConfig {
    /// Loads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if a required variable is not set.
    /// Returns `ConfigError::InvalidValue` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env file is fine.
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Same as [`AppConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let variables = Variables { lookup };

        let database_url = variables.required("DATABASE_URL")?;
        let analytics_database_url = variables
            .optional("ANALYTICS_DATABASE_URL")
            .unwrap_or_else(|| database_url.clone());
        let redis_url = variables.required("REDIS_URL")?;
        let event_topic = variables
            .optional("EVENT_TOPIC")
            .unwrap_or_else(|| GOOD_EVENTS_TOPIC.to_string());

        let cache_ttl_secs: u64 = variables.parsed("CACHE_TTL_SECS", 60)?;
        let operation_timeout_ms: u64 = variables.parsed("OPERATION_TIMEOUT_MS", 5000)?;
        let publish_policy = variables.parsed("PUBLISH_POLICY", PublishPolicy::default())?;
        let batch_max_size: usize = variables.parsed("BATCH_MAX_SIZE", 100)?;
        let batch_max_wait_ms: u64 = variables.parsed("BATCH_MAX_WAIT_MS", 1000)?;
        let batch_queue_capacity: usize = variables.parsed("BATCH_QUEUE_CAPACITY", 1024)?;
        let flush_timeout_ms: u64 = variables.parsed("FLUSH_TIMEOUT_MS", 1000)?;
        let database_max_connections: u32 = variables.parsed("DATABASE_MAX_CONNECTIONS", 10)?;
        let log_format = variables.parsed("LOG_FORMAT", LogFormat::default())?;

        if !(1..=MAX_BATCH_SIZE).contains(&batch_max_size) {
            return Err(invalid(
                "BATCH_MAX_SIZE",
                format!("must be between 1 and {MAX_BATCH_SIZE}"),
            ));
        }
        if batch_queue_capacity == 0 {
            return Err(invalid("BATCH_QUEUE_CAPACITY", "must be positive"));
        }
        if operation_timeout_ms == 0 {
            return Err(invalid("OPERATION_TIMEOUT_MS", "must be positive"));
        }

        Ok(Self {
            database_url,
            analytics_database_url,
            redis_url,
            event_topic,
            cache_ttl: Duration::from_secs(cache_ttl_secs.max(1)),
            operation_timeout: Duration::from_millis(operation_timeout_ms),
            publish_policy,
            batch_max_size,
            batch_max_wait: Duration::from_millis(batch_max_wait_ms),
            batch_queue_capacity,
            flush_timeout: Duration::from_millis(flush_timeout_ms),
            database_max_connections,
            log_format,
        })
    }

    #[must_use]
    pub const fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            operation_timeout: self.operation_timeout,
            publish_policy: self.publish_policy,
        }
    }

    #[must_use]
    pub const fn batcher_config(&self) -> BatcherConfig {
        BatcherConfig {
            max_batch_size: self.batch_max_size,
            max_wait: self.batch_max_wait,
            queue_capacity: self.batch_queue_capacity,
            flush_timeout: self.flush_timeout,
        }
    }
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

struct Variables<F> {
    lookup: F,
}

impl<F> Variables<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|value| !value.trim().is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    }

    fn parsed<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.optional(key).map_or(Ok(default), |value| {
            value
                .trim()
                .parse()
                .map_err(|error: T::Err| invalid(key, error.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let variables: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        AppConfig::from_lookup(|key| variables.get(key).cloned())
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("DATABASE_URL", "postgres://localhost/goods"),
        ("REDIS_URL", "redis://localhost:6379"),
    ];

    #[rstest]
    fn test_defaults() {
        let config = load(&REQUIRED).unwrap();

        assert_eq!(config.analytics_database_url, config.database_url);
        assert_eq!(config.event_topic, "logger:good");
        assert_eq!(config.cache_ttl, Duration::from_secs(60));
        assert_eq!(config.operation_timeout, Duration::from_secs(5));
        assert_eq!(config.publish_policy, PublishPolicy::WithinTransaction);
        assert_eq!(config.batch_max_size, 100);
        assert_eq!(config.batch_max_wait, Duration::from_secs(1));
        assert_eq!(config.batch_queue_capacity, 1024);
        assert_eq!(config.log_format, LogFormat::Plain);
    }

    #[rstest]
    #[case("DATABASE_URL")]
    #[case("REDIS_URL")]
    fn test_missing_required_variable(#[case] missing: &str) {
        let pairs: Vec<(&str, &str)> = REQUIRED
            .iter()
            .copied()
            .filter(|(key, _)| *key != missing)
            .collect();

        assert_eq!(
            load(&pairs),
            Err(ConfigError::MissingEnvVar(missing.to_string()))
        );
    }

    #[rstest]
    #[case("BATCH_MAX_SIZE", "0")]
    #[case("BATCH_MAX_SIZE", "5001")]
    #[case("BATCH_MAX_WAIT_MS", "soon")]
    #[case("PUBLISH_POLICY", "sometimes")]
    #[case("LOG_FORMAT", "xml")]
    fn test_invalid_values(#[case] key: &str, #[case] value: &str) {
        let mut pairs = REQUIRED.to_vec();
        pairs.push((key, value));

        let error = load(&pairs).unwrap_err();
        assert!(matches!(error, ConfigError::InvalidValue { key: ref found, .. } if found == key));
    }

    #[rstest]
    fn test_overrides_flow_into_component_configs() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("PUBLISH_POLICY", "after-commit"),
            ("CACHE_TTL_SECS", "0"),
            ("BATCH_MAX_SIZE", "250"),
            ("FLUSH_TIMEOUT_MS", "200"),
            ("LOG_FORMAT", "json"),
        ]);
        let config = load(&pairs).unwrap();

        assert_eq!(config.cache_ttl, Duration::from_secs(1));
        assert_eq!(
            config.service_config().publish_policy,
            PublishPolicy::AfterCommit
        );
        let batcher = config.batcher_config();
        assert_eq!(batcher.max_batch_size, 250);
        assert_eq!(batcher.flush_timeout, Duration::from_millis(200));
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[rstest]
    fn test_error_display() {
        let error = ConfigError::InvalidValue {
            key: "BATCH_MAX_SIZE".to_string(),
            message: "must be between 1 and 5000".to_string(),
        };
        assert_eq!(
            format!("{error}"),
            "Invalid value for BATCH_MAX_SIZE: must be between 1 and 5000"
        );
    }
}
