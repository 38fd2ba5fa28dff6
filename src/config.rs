use std::{path::PathBuf, time::Duration};

use dotenvy::dotenv;
use serde::Deserialize;

use crate::models::{error::ConfigError, retry::RetryConfig};

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub rabbitmq_url: String,

    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_broker_connect_timeout_ms")]
    pub broker_connect_timeout_ms: u64,
    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: u16,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_log_buffer_size")]
    pub log_buffer_size: usize,
    #[serde(default = "default_log_format")]
    pub log_format: String,

    #[serde(default)]
    pub email_provider_url: Option<String>,
    #[serde(default)]
    pub sms_provider_url: Option<String>,
    #[serde(default = "default_channel_timeout_ms")]
    pub channel_timeout_ms: u64,

    #[serde(default = "default_admin_email")]
    pub admin_email: String,
    #[serde(default)]
    pub admin_phone: Option<String>,

    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default = "default_idempotency_ttl_seconds")]
    pub idempotency_ttl_seconds: u64,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: u64,

    #[serde(default = "default_test_send_limit_per_minute")]
    pub test_send_limit_per_minute: u32,

    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "default_server_port")]
    pub server_port: u16,
}

fn default_consumer_group() -> String {
    "notification-service".to_string()
}

fn default_service_name() -> String {
    "notification-service".to_string()
}

fn default_broker_connect_timeout_ms() -> u64 {
    10_000
}

fn default_prefetch_count() -> u16 {
    10
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_log_buffer_size() -> usize {
    1000
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_channel_timeout_ms() -> u64 {
    5_000
}

fn default_admin_email() -> String {
    "admin@localhost".to_string()
}

fn default_idempotency_ttl_seconds() -> u64 {
    86_400
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_initial_retry_delay_ms() -> u64 {
    200
}

fn default_max_retry_delay_ms() -> u64 {
    5_000
}

fn default_retry_backoff_multiplier() -> u64 {
    2
}

fn default_test_send_limit_per_minute() -> u32 {
    10
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_server_port() -> u16 {
    3000
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        dotenv().ok();

        envy::from_env::<Self>()?.validated()
    }

    /// Builds a config from explicit `(NAME, value)` pairs instead of the process environment.
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::from_iter::<_, Self>(vars)?.validated()
    }

    fn validated(self) -> Result<Self, ConfigError> {
        if self.log_buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "LOG_BUFFER_SIZE must be greater than zero".to_string(),
            ));
        }
        if self.max_retry_attempts == 0 {
            return Err(ConfigError::Invalid(
                "MAX_RETRY_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.retry_backoff_multiplier == 0 {
            return Err(ConfigError::Invalid(
                "RETRY_BACKOFF_MULTIPLIER must be at least 1".to_string(),
            ));
        }
        Ok(self)
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn uses_in_memory_broker(&self) -> bool {
        self.rabbitmq_url.starts_with("memory://")
    }

    pub fn log_dir(&self) -> PathBuf {
        PathBuf::from(&self.log_dir)
    }

    pub fn channel_timeout(&self) -> Duration {
        Duration::from_millis(self.channel_timeout_ms)
    }

    pub fn broker_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.broker_connect_timeout_ms)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retry_attempts,
            initial_delay_ms: self.initial_retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
            backoff_multiplier: self.retry_backoff_multiplier,
        }
    }
}
