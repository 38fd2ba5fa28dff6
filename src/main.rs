use std::sync::Arc;

use anyhow::{Error, Result};
use notification_pipeline::{
    api::{AppState, run_api_server},
    clients::{
        broker::{BrokerConsumer, BrokerProducer},
        channel::{ConsoleChannel, HttpChannel, NotificationChannel},
        health::HealthChecker,
        in_memory::InMemoryBroker,
        rbmq::RabbitMqClient,
        redis::{DeliveryLedger, RedisClient},
    },
    config::Config,
    models::{
        event::{DomainEvent, EventPayload, ServiceLifecycle},
        status::ChannelKind,
    },
    pipeline::{
        consumer::EventConsumer,
        handlers::{NOTIFICATION_TOPICS, NotificationHandlers, SUBSCRIBED_KINDS},
        logger::NotificationLogger,
        publisher::EventPublisher,
        rate_limit::TestSendLimiter,
        templates::TemplateCatalog,
    },
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

fn setup_logging(format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if format.eq_ignore_ascii_case("pretty") {
        builder.pretty().init();
    } else {
        builder.json().init();
    }
}

fn build_channel(
    config: &Config,
    kind: ChannelKind,
    endpoint: Option<&String>,
    templates: &Arc<TemplateCatalog>,
) -> Result<Arc<dyn NotificationChannel>, Error> {
    match endpoint {
        Some(endpoint) => Ok(Arc::new(HttpChannel::new(
            kind,
            endpoint,
            config.channel_timeout(),
            Arc::clone(templates),
            config.retry_config(),
        )?)),
        None => {
            warn!(channel = %kind, "No provider configured, notifications will only be logged");
            Ok(Arc::new(ConsoleChannel::new(kind, Arc::clone(templates))))
        }
    }
}

fn lifecycle_event(config: &Config, instance_id: &str, started: bool) -> DomainEvent {
    let lifecycle = ServiceLifecycle {
        service_name: config.service_name.clone(),
        instance_id: instance_id.to_string(),
        reason: None,
    };

    DomainEvent::new(if started {
        EventPayload::ServiceStarted(lifecycle)
    } else {
        EventPayload::ServiceStopped(lifecycle)
    })
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::load()?;
    setup_logging(&config.log_format);

    let instance_id = Uuid::new_v4().to_string();

    info!(
        service = %config.service_name,
        environment = %config.environment,
        instance_id = %instance_id,
        "Starting notification service"
    );

    let (producer, broker_consumer): (Arc<dyn BrokerProducer>, Arc<dyn BrokerConsumer>) =
        if config.uses_in_memory_broker() {
            warn!("Using the in-memory broker, events stay inside this process");
            let broker = Arc::new(InMemoryBroker::new());
            (broker.clone() as Arc<dyn BrokerProducer>, broker as Arc<dyn BrokerConsumer>)
        } else {
            let client = Arc::new(RabbitMqClient::new(&config));
            (client.clone() as Arc<dyn BrokerProducer>, client as Arc<dyn BrokerConsumer>)
        };

    let templates = Arc::new(TemplateCatalog::builtin());
    let email = build_channel(
        &config,
        ChannelKind::Email,
        config.email_provider_url.as_ref(),
        &templates,
    )?;
    let sms = build_channel(
        &config,
        ChannelKind::Sms,
        config.sms_provider_url.as_ref(),
        &templates,
    )?;

    let logger = Arc::new(NotificationLogger::from_config(&config));

    let redis = match &config.redis_url {
        Some(url) => match RedisClient::connect(url, &config).await {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                warn!(error = %e, "Redis unavailable, duplicate deliveries will not be suppressed");
                None
            }
        },
        None => None,
    };

    let mut handlers =
        NotificationHandlers::from_config(&config, email.clone(), sms.clone(), logger.clone());
    if let Some(redis) = &redis {
        handlers = handlers.with_ledger(redis.clone() as Arc<dyn DeliveryLedger>);
    }

    let publisher = EventPublisher::new(
        producer.clone(),
        config.service_name.clone(),
        config.retry_config(),
    );
    publisher.connect().await?;

    let mut consumer = EventConsumer::new(
        config.consumer_group.clone(),
        NOTIFICATION_TOPICS,
        broker_consumer,
    );
    consumer.on_each(SUBSCRIBED_KINDS, Arc::new(handlers));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let consumer_task = tokio::spawn(async move { consumer.run(shutdown_rx).await });

    let mut health = HealthChecker::new(producer.clone(), logger.clone());
    if let Some(redis) = &redis {
        health = health.with_redis(redis.clone());
    }

    let state = AppState {
        logger: logger.clone(),
        email,
        sms,
        templates,
        limiter: Arc::new(TestSendLimiter::per_minute(
            config.test_send_limit_per_minute,
        )),
        health: Arc::new(health),
        production: config.is_production(),
    };

    let mut api_shutdown = shutdown_tx.subscribe();
    let api_task = tokio::spawn(run_api_server(config.server_port, state, async move {
        let _ = api_shutdown.changed().await;
    }));

    if let Err(e) = publisher
        .publish_with_retry(lifecycle_event(&config, &instance_id, true), None)
        .await
    {
        warn!(error = %e, "Failed to announce service start");
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);

    match consumer_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Consumer stopped with an error"),
        Err(e) => error!(error = %e, "Consumer task panicked"),
    }
    match api_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Admin API stopped with an error"),
        Err(e) => error!(error = %e, "Admin API task panicked"),
    }

    if let Err(e) = publisher
        .publish(lifecycle_event(&config, &instance_id, false), None)
        .await
    {
        warn!(error = %e, "Failed to announce service stop");
    }
    publisher.disconnect().await?;

    info!("Notification service stopped");

    Ok(())
}
