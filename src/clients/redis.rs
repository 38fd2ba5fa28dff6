use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use tracing::{info, warn};

use crate::{
    config::Config,
    models::{error::LedgerError, retry::RetryConfig, status::IdempotencyStatus},
    utils::retry_with_backoff,
};

/// Records which notifications were already delivered so a redelivered event
/// does not reach the customer twice.
#[async_trait]
pub trait DeliveryLedger: Send + Sync {
    async fn check(&self, key: &str) -> Result<IdempotencyStatus, LedgerError>;

    async fn mark_processing(&self, key: &str) -> Result<(), LedgerError>;

    async fn mark_sent(&self, key: &str) -> Result<(), LedgerError>;

    async fn mark_failed(&self, key: &str) -> Result<(), LedgerError>;
}

pub struct RedisClient {
    connection: MultiplexedConnection,
    idempotency_ttl_seconds: u64,
    retry_config: RetryConfig,
}

impl RedisClient {
    pub async fn connect(redis_url: &str, config: &Config) -> Result<Self, LedgerError> {
        info!("Connecting to Redis...");

        let client = Client::open(redis_url)?;
        let connection = client.get_multiplexed_async_connection().await?;

        info!("Redis connection established");

        Ok(Self {
            connection,
            idempotency_ttl_seconds: config.idempotency_ttl_seconds,
            retry_config: config.retry_config(),
        })
    }

    pub async fn ping(&self) -> Result<(), LedgerError> {
        let mut conn = self.connection.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    fn key(delivery_key: &str) -> String {
        format!("idempotency:{}", delivery_key)
    }

    async fn set_status(&self, delivery_key: &str, status: &str) -> Result<(), LedgerError> {
        let mut conn = self.connection.clone();
        conn.set_ex::<_, _, ()>(Self::key(delivery_key), status, self.idempotency_ttl_seconds)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DeliveryLedger for RedisClient {
    async fn check(&self, key: &str) -> Result<IdempotencyStatus, LedgerError> {
        let redis_key = Self::key(key);
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(&redis_key).await?;

        match value.as_deref() {
            None => Ok(IdempotencyStatus::NotFound),
            Some("processing") => Ok(IdempotencyStatus::Processing),
            Some("sent") => Ok(IdempotencyStatus::Sent),
            Some("failed") => Ok(IdempotencyStatus::Failed),
            Some(other) => {
                warn!(
                    status = other,
                    key = %redis_key,
                    "Unknown idempotency status"
                );
                Ok(IdempotencyStatus::NotFound)
            }
        }
    }

    async fn mark_processing(&self, key: &str) -> Result<(), LedgerError> {
        self.set_status(key, "processing").await
    }

    async fn mark_sent(&self, key: &str) -> Result<(), LedgerError> {
        retry_with_backoff(&self.retry_config, || self.set_status(key, "sent")).await
    }

    async fn mark_failed(&self, key: &str) -> Result<(), LedgerError> {
        self.set_status(key, "failed").await
    }
}
