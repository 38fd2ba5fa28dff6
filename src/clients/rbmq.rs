use std::time::Duration;

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
};
use tokio::{sync::RwLock, time::timeout};
use tracing::{debug, info, warn};

use crate::{
    clients::broker::{BrokerConsumer, BrokerProducer, BrokerTransaction, MessageStream},
    config::Config,
    models::{
        error::BrokerError,
        message::{InboundMessage, MessageHeaders, OutboundMessage},
        retry::RetryConfig,
        topic::Topic,
    },
    utils::retry_with_backoff,
};

struct Session {
    connection: Connection,
    publish_channel: Channel,
    consume_channel: Channel,
}

/// RabbitMQ binding. Every topic is a durable topic exchange, the partition
/// key is the routing key, and each consumer group owns one durable queue per
/// topic.
pub struct RabbitMqClient {
    url: String,
    connect_timeout: Duration,
    prefetch_count: u16,
    retry_config: RetryConfig,
    session: RwLock<Option<Session>>,
}

impl RabbitMqClient {
    pub fn new(config: &Config) -> Self {
        Self {
            url: config.rabbitmq_url.clone(),
            connect_timeout: config.broker_connect_timeout(),
            prefetch_count: config.prefetch_count,
            retry_config: config.retry_config(),
            session: RwLock::new(None),
        }
    }

    async fn open_connection(&self) -> Result<Connection, BrokerError> {
        retry_with_backoff(&self.retry_config, || async move {
            match timeout(
                self.connect_timeout,
                Connection::connect(&self.url, ConnectionProperties::default()),
            )
            .await
            {
                Ok(Ok(connection)) => Ok(connection),
                Ok(Err(e)) => Err(BrokerError::Connection(e.to_string())),
                Err(_) => Err(BrokerError::Connection(format!(
                    "timed out after {}ms",
                    self.connect_timeout.as_millis()
                ))),
            }
        })
        .await
    }

    async fn declare_topics(channel: &Channel) -> Result<(), BrokerError> {
        for topic in Topic::ALL {
            channel
                .exchange_declare(
                    topic.as_str(),
                    ExchangeKind::Topic,
                    ExchangeDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| {
                    BrokerError::Connection(format!("failed to declare topic {}: {}", topic, e))
                })?;
        }

        Ok(())
    }

    pub fn properties(message: &OutboundMessage) -> BasicProperties {
        let mut headers = FieldTable::default();
        let header_values = [
            ("eventType", &message.headers.event_type),
            ("version", &message.headers.version),
            ("source", &message.headers.source),
            ("timestamp", &message.headers.timestamp),
        ];
        for (name, value) in header_values {
            headers.insert(name.into(), AMQPValue::LongString(value.clone().into()));
        }

        BasicProperties::default()
            .with_message_id(message.message_id.clone().into())
            .with_content_type("application/json".into())
            .with_delivery_mode(2)
            .with_headers(headers)
    }

    /// Reads back the headers written by [`RabbitMqClient::properties`].
    /// `None` when the message carries no `eventType` header.
    pub fn inbound_headers(properties: &BasicProperties) -> Option<MessageHeaders> {
        let table = properties.headers().as_ref()?;
        let text = |name: &str| match table.inner().get(name) {
            Some(AMQPValue::LongString(value)) => {
                Some(String::from_utf8_lossy(value.as_bytes()).into_owned())
            }
            Some(AMQPValue::ShortString(value)) => Some(value.as_str().to_string()),
            _ => None,
        };

        Some(MessageHeaders {
            event_type: text("eventType")?,
            version: text("version").unwrap_or_default(),
            source: text("source").unwrap_or_default(),
            timestamp: text("timestamp").unwrap_or_default(),
        })
    }
}

#[async_trait]
impl BrokerProducer for RabbitMqClient {
    async fn connect(&self) -> Result<(), BrokerError> {
        let mut session = self.session.write().await;
        if session.is_some() {
            return Ok(());
        }

        info!("Connecting to RabbitMQ...");

        let connection = self.open_connection().await?;

        info!("RabbitMQ connection established");

        let publish_channel = connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::Connection(format!("channel creation failed: {}", e)))?;

        // Confirm mode: a send succeeds only once the broker has taken the message.
        publish_channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| BrokerError::Connection(format!("confirm mode failed: {}", e)))?;

        Self::declare_topics(&publish_channel).await?;

        info!("Topic exchanges declared");

        let consume_channel = connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::Connection(format!("channel creation failed: {}", e)))?;

        consume_channel
            .basic_qos(self.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| BrokerError::Connection(format!("failed to set up QoS: {}", e)))?;

        *session = Some(Session {
            connection,
            publish_channel,
            consume_channel,
        });

        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        let Some(session) = self.session.write().await.take() else {
            return Ok(());
        };

        session
            .connection
            .close(200, "shutdown")
            .await
            .map_err(|e| BrokerError::Connection(format!("close failed: {}", e)))?;

        info!("RabbitMQ connection closed");

        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.session
            .read()
            .await
            .as_ref()
            .is_some_and(|session| session.connection.status().connected())
    }

    async fn send(&self, topic: &str, messages: Vec<OutboundMessage>) -> Result<(), BrokerError> {
        let session = self.session.read().await;
        let session = session.as_ref().ok_or(BrokerError::NotConnected)?;

        let mut confirms = Vec::with_capacity(messages.len());
        for message in &messages {
            let confirm = session
                .publish_channel
                .basic_publish(
                    topic,
                    &message.key,
                    BasicPublishOptions::default(),
                    &message.value,
                    Self::properties(message),
                )
                .await
                .map_err(|e| BrokerError::Rejected {
                    topic: topic.to_string(),
                    reason: e.to_string(),
                })?;
            confirms.push(confirm);
        }

        for confirm in confirms {
            let confirmation = confirm.await.map_err(|e| BrokerError::Rejected {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;

            if confirmation.is_nack() {
                return Err(BrokerError::Rejected {
                    topic: topic.to_string(),
                    reason: "broker nacked message".to_string(),
                });
            }
        }

        debug!(topic, count = messages.len(), "Messages confirmed by broker");

        Ok(())
    }

    async fn begin_transaction(&self) -> Result<Box<dyn BrokerTransaction>, BrokerError> {
        let session = self.session.read().await;
        let session = session.as_ref().ok_or(BrokerError::NotConnected)?;

        // Confirm mode and transactions cannot share a channel.
        let channel = session
            .connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::Transaction(format!("channel creation failed: {}", e)))?;

        channel
            .tx_select()
            .await
            .map_err(|e| BrokerError::Transaction(e.to_string()))?;

        Ok(Box::new(RabbitMqTransaction { channel }))
    }
}

#[async_trait]
impl BrokerConsumer for RabbitMqClient {
    async fn subscribe(&self, group: &str, topics: &[&str]) -> Result<MessageStream, BrokerError> {
        let session = self.session.read().await;
        let session = session.as_ref().ok_or(BrokerError::NotConnected)?;
        let channel = &session.consume_channel;

        let mut streams = Vec::with_capacity(topics.len());
        for topic in topics {
            let queue_name = format!("{}.{}", group, topic);

            channel
                .queue_declare(
                    &queue_name,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| BrokerError::Consume(format!("failed to declare {}: {}", queue_name, e)))?;

            channel
                .queue_bind(
                    &queue_name,
                    topic,
                    "#",
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| BrokerError::Consume(format!("failed to bind {}: {}", queue_name, e)))?;

            let consumer = channel
                .basic_consume(
                    &queue_name,
                    &format!("{}-{}", group, topic),
                    BasicConsumeOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| BrokerError::Consume(format!("failed to consume {}: {}", queue_name, e)))?;

            info!(queue = %queue_name, topic, "Consumer created for topic");

            let topic = topic.to_string();
            streams.push(consumer.map(move |delivery| match delivery {
                Ok(delivery) => {
                    let delivery_tag = delivery.delivery_tag;
                    let key = delivery.routing_key.as_str().to_string();
                    let headers = RabbitMqClient::inbound_headers(&delivery.properties);
                    Ok(InboundMessage {
                        topic: topic.clone(),
                        key,
                        payload: delivery.data,
                        headers,
                        delivery_tag,
                    })
                }
                Err(e) => Err(BrokerError::Consume(e.to_string())),
            }));
        }

        Ok(Box::pin(stream::select_all(streams)))
    }

    async fn ack(&self, message: &InboundMessage) -> Result<(), BrokerError> {
        let session = self.session.read().await;
        let session = session.as_ref().ok_or(BrokerError::NotConnected)?;

        session
            .consume_channel
            .basic_ack(message.delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| BrokerError::Consume(format!("failed to acknowledge message: {}", e)))
    }
}

struct RabbitMqTransaction {
    channel: Channel,
}

impl RabbitMqTransaction {
    async fn close(&self) {
        if let Err(e) = self.channel.close(200, "transaction complete").await {
            warn!(error = %e, "Failed to close transaction channel");
        }
    }
}

#[async_trait]
impl BrokerTransaction for RabbitMqTransaction {
    async fn send(&mut self, message: OutboundMessage) -> Result<(), BrokerError> {
        self.channel
            .basic_publish(
                &message.topic,
                &message.key,
                BasicPublishOptions::default(),
                &message.value,
                RabbitMqClient::properties(&message),
            )
            .await
            .map_err(|e| BrokerError::Rejected {
                topic: message.topic.clone(),
                reason: e.to_string(),
            })?;

        Ok(())
    }

    async fn commit(&mut self) -> Result<(), BrokerError> {
        let result = self
            .channel
            .tx_commit()
            .await
            .map_err(|e| BrokerError::Transaction(e.to_string()));
        self.close().await;
        result
    }

    async fn abort(&mut self) -> Result<(), BrokerError> {
        let result = self
            .channel
            .tx_rollback()
            .await
            .map_err(|e| BrokerError::Transaction(e.to_string()));
        self.close().await;
        result
    }
}
