use anyhow::Result;
use notification_pipeline::{config::Config, models::error::ConfigError};
use tokio_test::{assert_err, assert_ok};

fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// Test: Only the broker URL is required
#[tokio::test]
async fn test_defaults() -> Result<()> {
    let config = assert_ok!(Config::from_vars(vars(&[(
        "RABBITMQ_URL",
        "amqp://localhost:5672"
    )])));

    assert_eq!(config.consumer_group, "notification-service");
    assert_eq!(config.log_buffer_size, 1000);
    assert_eq!(config.server_port, 3000);
    assert_eq!(config.test_send_limit_per_minute, 10);
    assert!(config.email_provider_url.is_none());
    assert!(!config.is_production());
    assert!(!config.uses_in_memory_broker());
    assert_eq!(config.retry_config().max_attempts, 3);

    Ok(())
}

/// Test: Overrides are read from the environment names
#[tokio::test]
async fn test_overrides() -> Result<()> {
    let config = Config::from_vars(vars(&[
        ("RABBITMQ_URL", "memory://"),
        ("ENVIRONMENT", "Production"),
        ("LOG_BUFFER_SIZE", "250"),
        ("ADMIN_PHONE", "+15550000000"),
        ("SERVER_PORT", "8080"),
    ]))?;

    assert!(config.uses_in_memory_broker());
    assert!(config.is_production());
    assert_eq!(config.log_buffer_size, 250);
    assert_eq!(config.admin_phone.as_deref(), Some("+15550000000"));
    assert_eq!(config.server_port, 8080);

    Ok(())
}

/// Test: A missing broker URL is a configuration error
#[tokio::test]
async fn test_missing_broker_url() -> Result<()> {
    let error = assert_err!(Config::from_vars(vars(&[("LOG_DIR", "/tmp/logs")])));

    assert!(matches!(error, ConfigError::Env(_)));

    Ok(())
}

/// Test: Out-of-range values are rejected
#[tokio::test]
async fn test_invalid_values() -> Result<()> {
    let zero_buffer = Config::from_vars(vars(&[
        ("RABBITMQ_URL", "memory://"),
        ("LOG_BUFFER_SIZE", "0"),
    ]));
    assert!(matches!(zero_buffer, Err(ConfigError::Invalid(_))));

    let zero_attempts = Config::from_vars(vars(&[
        ("RABBITMQ_URL", "memory://"),
        ("MAX_RETRY_ATTEMPTS", "0"),
    ]));
    assert!(matches!(zero_attempts, Err(ConfigError::Invalid(_))));

    let not_a_number = Config::from_vars(vars(&[
        ("RABBITMQ_URL", "memory://"),
        ("SERVER_PORT", "http"),
    ]));
    assert!(matches!(not_a_number, Err(ConfigError::Env(_))));

    Ok(())
}
