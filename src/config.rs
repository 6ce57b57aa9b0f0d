//! Configuration types for lms-qa

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use utoipa::ToSchema;

/// Main configuration for lms-qa
///
/// Fields are organized into sub-configs, one per component. Each component
/// receives only its own sub-config at construction.
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct Config {
    /// Remote content API connection
    #[serde(default)]
    pub canvas: CanvasConfig,

    /// Outbound request ceilings
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Retry policy for transient failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Execution engine limits
    #[serde(default)]
    pub engine: EngineConfig,

    /// Progress throttling and replay
    #[serde(default)]
    pub progress: ProgressConfig,

    /// Execution history storage
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// REST API server
    #[serde(default)]
    pub api: ApiConfig,
}

impl Config {
    /// Check invariants that serde cannot express
    ///
    /// Rejects zero limits, zero concurrency and inverted timeout bounds.
    pub fn validate(&self) -> Result<()> {
        fn invalid(key: &str, message: &str) -> Error {
            Error::Config {
                message: message.to_string(),
                key: Some(key.to_string()),
            }
        }

        if url::Url::parse(&self.canvas.base_url).is_err() {
            return Err(invalid("canvas.base_url", "base_url must be an absolute URL"));
        }
        if self.canvas.per_page == 0 {
            return Err(invalid("canvas.per_page", "per_page must be at least 1"));
        }
        if self.rate_limit.requests_per_minute == 0 {
            return Err(invalid(
                "rate_limit.requests_per_minute",
                "requests_per_minute must be at least 1",
            ));
        }
        if self.rate_limit.requests_per_hour == 0 {
            return Err(invalid(
                "rate_limit.requests_per_hour",
                "requests_per_hour must be at least 1",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "max_attempts must be at least 1"));
        }
        if self.engine.max_concurrent_executions == 0 {
            return Err(invalid(
                "engine.max_concurrent_executions",
                "max_concurrent_executions must be at least 1",
            ));
        }
        if self.engine.min_timeout > self.engine.max_timeout {
            return Err(invalid(
                "engine.min_timeout",
                "min_timeout must not exceed max_timeout",
            ));
        }
        if self.engine.default_timeout < self.engine.min_timeout
            || self.engine.default_timeout > self.engine.max_timeout
        {
            return Err(invalid(
                "engine.default_timeout",
                "default_timeout must lie between min_timeout and max_timeout",
            ));
        }
        if self.progress.retention == 0 {
            return Err(invalid("progress.retention", "retention must be at least 1"));
        }
        if self.progress.channel_capacity == 0 {
            return Err(invalid(
                "progress.channel_capacity",
                "channel_capacity must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Remote content API (Canvas) connection settings
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct CanvasConfig {
    /// Base URL of the LMS, e.g. "https://school.instructure.com"
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token used for every request
    #[serde(default)]
    pub access_token: String,

    /// Per-request transport timeout (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub request_timeout: Duration,

    /// Page size requested from list endpoints (default: 100)
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            access_token: String::new(),
            request_timeout: default_request_timeout(),
            per_page: default_per_page(),
        }
    }
}

/// Outbound rate limit configuration
///
/// Defaults sit below the LMS's published ceilings of 200/minute and 6000/hour.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct RateLimitConfig {
    /// Requests allowed per minute window (default: 180)
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    /// Requests allowed per hour window (default: 4800)
    #[serde(default = "default_requests_per_hour")]
    pub requests_per_hour: u32,

    /// 429 waits tolerated per request before giving up (default: 10)
    #[serde(default = "default_max_rate_limit_waits")]
    pub max_rate_limit_waits: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            requests_per_hour: default_requests_per_hour(),
            max_rate_limit_waits: default_max_rate_limit_waits(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct RetryConfig {
    /// Maximum number of attempts (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Execution engine configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct EngineConfig {
    /// Executions allowed to run at once; the rest queue (default: 3)
    #[serde(default = "default_max_concurrent_executions")]
    pub max_concurrent_executions: usize,

    /// Timeout applied when a TaskConfig does not set one (default: 300 seconds)
    #[serde(default = "default_timeout", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub default_timeout: Duration,

    /// Smallest timeout a TaskConfig may request (default: 30 seconds)
    #[serde(default = "default_min_timeout", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub min_timeout: Duration,

    /// Largest timeout a TaskConfig may request (default: 1800 seconds)
    #[serde(default = "default_max_timeout", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub max_timeout: Duration,

    /// Persisted finished executions kept in memory (default: 100)
    ///
    /// Older ones are dropped from memory and served from the result store.
    /// Without a result store nothing is dropped.
    #[serde(default = "default_retained_finished")]
    pub retained_finished: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: default_max_concurrent_executions(),
            default_timeout: default_timeout(),
            min_timeout: default_min_timeout(),
            max_timeout: default_max_timeout(),
            retained_finished: default_retained_finished(),
        }
    }
}

/// Progress tracker configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ProgressConfig {
    /// Minimum spacing between delivered updates in milliseconds (default: 500)
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,

    /// Updates kept for replay to late subscribers (default: 200)
    #[serde(default = "default_retention")]
    pub retention: usize,

    /// Broadcast buffer per execution (default: 256)
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl ProgressConfig {
    /// Minimum spacing between delivered updates
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
            retention: default_retention(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Execution history storage configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct PersistenceConfig {
    /// Database path (default: "./lms-qa.db")
    #[serde(default = "default_database_path")]
    #[schema(value_type = String)]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiConfig {
    /// Address to bind to (default: 127.0.0.1:6790)
    #[serde(default = "default_bind_address")]
    #[schema(value_type = String)]
    pub bind_address: SocketAddr,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cors_enabled: true,
            cors_origins: default_cors_origins(),
        }
    }
}

fn default_base_url() -> String {
    "https://canvas.instructure.com".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_per_page() -> u32 {
    100
}

fn default_requests_per_minute() -> u32 {
    180
}

fn default_requests_per_hour() -> u32 {
    4800
}

fn default_max_rate_limit_waits() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_concurrent_executions() -> usize {
    3
}

fn default_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_min_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_timeout() -> Duration {
    Duration::from_secs(1800)
}

fn default_retained_finished() -> usize {
    100
}

fn default_min_interval_ms() -> u64 {
    500
}

fn default_retention() -> usize {
    200
}

fn default_channel_capacity() -> usize {
    256
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./lms-qa.db")
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 6790))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_documented_defaults() {
        let config: Config = serde_json::from_str("{}").expect("deserialize failed");

        assert_eq!(config.rate_limit.requests_per_minute, 180);
        assert_eq!(config.rate_limit.requests_per_hour, 4800);
        assert_eq!(config.rate_limit.max_rate_limit_waits, 10);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_delay, Duration::from_secs(1));
        assert_eq!(config.engine.max_concurrent_executions, 3);
        assert_eq!(config.engine.default_timeout, Duration::from_secs(300));
        assert_eq!(config.engine.min_timeout, Duration::from_secs(30));
        assert_eq!(config.engine.max_timeout, Duration::from_secs(1800));
        assert_eq!(config.engine.retained_finished, 100);
        assert_eq!(config.progress.min_interval(), Duration::from_millis(500));
        assert_eq!(config.progress.retention, 200);
        assert_eq!(config.canvas.per_page, 100);
        assert!(config.validate().is_ok(), "defaults must validate");
    }

    #[test]
    fn durations_serialize_as_whole_seconds() {
        let config = EngineConfig {
            default_timeout: Duration::from_secs(600),
            ..Default::default()
        };

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["default_timeout"], 600);
        assert_eq!(json["max_timeout"], 1800);

        let back: EngineConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back.default_timeout, Duration::from_secs(600));
    }

    #[test]
    fn validate_rejects_zero_rate_limit_with_key() {
        let mut config = Config::default();
        config.rate_limit.requests_per_minute = 0;

        match config.validate() {
            Err(Error::Config { key, .. }) => {
                assert_eq!(key.as_deref(), Some("rate_limit.requests_per_minute"));
            }
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.engine.max_concurrent_executions = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_inverted_timeout_bounds() {
        let mut config = Config::default();
        config.engine.min_timeout = Duration::from_secs(2000);

        match config.validate() {
            Err(Error::Config { key, .. }) => {
                assert_eq!(key.as_deref(), Some("engine.min_timeout"));
            }
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_relative_base_url() {
        let mut config = Config::default();
        config.canvas.base_url = "canvas.local".to_string();
        assert!(config.validate().is_err());
    }
}
