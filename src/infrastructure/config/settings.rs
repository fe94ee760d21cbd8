use std::env;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Consecutive failures before the circuit opens
    #[serde(default = "default_cb_failure_threshold")]
    pub circuit_breaker_failure_threshold: u32,
    /// Successes in half-open state before the circuit closes
    #[serde(default = "default_cb_success_threshold")]
    pub circuit_breaker_success_threshold: u32,
    /// Seconds an open circuit waits before probing again
    #[serde(default = "default_cb_reset_timeout")]
    pub circuit_breaker_reset_timeout_seconds: u64,
}

/// Outbox queue and consumer tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueSettings {
    /// Store backend: "redis" or "memory"
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Namespace prefix shared by every outbox key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Default retry budget for bounded failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Sleep when no work is found
    #[serde(default = "default_idle_poll_interval_ms")]
    pub idle_poll_interval_ms: u64,
    /// Pause after each successful dispatch (~30 msg/s)
    #[serde(default = "default_dispatch_interval_ms")]
    pub dispatch_interval_ms: u64,
    /// Pause after a store error inside the consumer loop
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
    /// First delay after a network failure
    #[serde(default = "default_transient_base_delay_secs")]
    pub transient_base_delay_secs: u64,
    /// Upper bound for every computed backoff
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
    /// Jitter factor (0.0 to 1.0) applied to network backoff only
    #[serde(default)]
    pub transient_jitter: f64,
    /// Drop queued edits when the consumer starts
    #[serde(default = "default_purge_stale_edits_on_start")]
    pub purge_stale_edits_on_start: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_cb_failure_threshold() -> u32 {
    5
}

fn default_cb_success_threshold() -> u32 {
    2
}

fn default_cb_reset_timeout() -> u64 {
    30
}

fn default_backend() -> String {
    "redis".to_string()
}

fn default_key_prefix() -> String {
    "outbox:".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_idle_poll_interval_ms() -> u64 {
    100
}

fn default_dispatch_interval_ms() -> u64 {
    34
}

fn default_error_backoff_ms() -> u64 {
    1000
}

fn default_transient_base_delay_secs() -> u64 {
    30
}

fn default_max_backoff_secs() -> u64 {
    300 // 5 minutes
}

fn default_purge_stale_edits_on_start() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("redis.url", default_redis_url())?
            .set_default("queue.backend", default_backend())?
            .set_default("queue.key_prefix", default_key_prefix())?
            .set_default("logging.level", default_log_level())?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // REDIS__URL, QUEUE__KEY_PREFIX, LOGGING__FORMAT, ...
            .add_source(
                Environment::default()
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}

impl QueueSettings {
    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_millis(self.idle_poll_interval_ms)
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            circuit_breaker_failure_threshold: default_cb_failure_threshold(),
            circuit_breaker_success_threshold: default_cb_success_threshold(),
            circuit_breaker_reset_timeout_seconds: default_cb_reset_timeout(),
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            key_prefix: default_key_prefix(),
            max_retries: default_max_retries(),
            idle_poll_interval_ms: default_idle_poll_interval_ms(),
            dispatch_interval_ms: default_dispatch_interval_ms(),
            error_backoff_ms: default_error_backoff_ms(),
            transient_base_delay_secs: default_transient_base_delay_secs(),
            max_backoff_secs: default_max_backoff_secs(),
            transient_jitter: 0.0,
            purge_stale_edits_on_start: default_purge_stale_edits_on_start(),
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
