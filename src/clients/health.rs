use std::{collections::HashMap, sync::Arc, time::Instant};

use chrono::Utc;
use tracing::{debug, warn};

use crate::{
    clients::{broker::BrokerProducer, redis::RedisClient},
    models::health::{HealthCheckResponse, HealthStatus, ServiceHealth},
    pipeline::logger::NotificationLogger,
};

const MESSAGE_BROKER: &str = "message_broker";
const NOTIFICATION_LOGGER: &str = "notification_logger";
const CACHE_SERVICE: &str = "cache_service";

pub struct HealthChecker {
    broker: Arc<dyn BrokerProducer>,
    logger: Arc<NotificationLogger>,
    redis: Option<Arc<RedisClient>>,
}

impl HealthChecker {
    pub fn new(broker: Arc<dyn BrokerProducer>, logger: Arc<NotificationLogger>) -> Self {
        Self {
            broker,
            logger,
            redis: None,
        }
    }

    pub fn with_redis(mut self, redis: Arc<RedisClient>) -> Self {
        self.redis = Some(redis);
        self
    }

    pub async fn check_all(&self) -> HealthCheckResponse {
        let mut checks = HashMap::new();

        checks.insert(MESSAGE_BROKER.to_string(), self.check_broker().await);
        checks.insert(NOTIFICATION_LOGGER.to_string(), self.check_logger());

        if let Some(redis) = &self.redis {
            checks.insert(CACHE_SERVICE.to_string(), Self::check_redis(redis).await);
        }

        HealthCheckResponse {
            status: Self::determine_overall_status(&checks),
            timestamp: Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            checks,
        }
    }

    async fn check_broker(&self) -> ServiceHealth {
        let start = Instant::now();

        if self.broker.is_connected().await {
            let elapsed = start.elapsed().as_millis() as u64;
            debug!(response_time_ms = elapsed, "Broker health check passed");
            ServiceHealth::healthy(elapsed)
        } else {
            warn!("Broker connection is down");
            ServiceHealth::unhealthy("Broker connection is down".to_string())
        }
    }

    fn check_logger(&self) -> ServiceHealth {
        let health = self.logger.get_health_status();

        let service = match health.status {
            HealthStatus::Healthy => ServiceHealth::healthy(0),
            _ => {
                warn!(error_rate = health.error_rate, "Notification error rate is high");
                ServiceHealth::unhealthy(format!(
                    "{}% of the last {} notifications failed",
                    health.error_rate, health.sample_size
                ))
            }
        };

        service.with_error_rate(health.error_rate)
    }

    async fn check_redis(redis: &RedisClient) -> ServiceHealth {
        let start = Instant::now();

        match redis.ping().await {
            Ok(()) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(response_time_ms = elapsed, "Redis health check passed");
                ServiceHealth::healthy(elapsed)
            }
            Err(e) => {
                warn!(error = %e, "Redis ping failed");
                ServiceHealth::unhealthy(format!("Ping failed: {}", e))
            }
        }
    }

    /// Broker loss is fatal. Anything else only degrades the service.
    fn determine_overall_status(checks: &HashMap<String, ServiceHealth>) -> HealthStatus {
        let broker_unhealthy = checks
            .get(MESSAGE_BROKER)
            .is_some_and(|health| health.status == HealthStatus::Unhealthy);

        let has_problem = checks
            .values()
            .any(|health| health.status != HealthStatus::Healthy);

        if broker_unhealthy {
            HealthStatus::Unhealthy
        } else if has_problem {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}
