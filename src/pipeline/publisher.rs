use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU32, Ordering},
};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    clients::broker::{BrokerProducer, BrokerTransaction},
    models::{
        error::PublishError,
        event::{DEFAULT_EVENT_VERSION, DomainEvent},
        message::{DeadLetterEvent, DeadLetterPayload, MessageHeaders, OutboundMessage},
        retry::RetryConfig,
        topic::{Topic, route_for},
    },
    utils::retry_with_backoff,
};

/// Fills the envelope fields a producer left empty. Present fields are kept as is,
/// so enriching twice is a no-op.
pub fn enrich(mut event: DomainEvent) -> DomainEvent {
    let event_id = event
        .event_id
        .get_or_insert_with(|| Uuid::new_v4().to_string())
        .clone();

    event.timestamp.get_or_insert_with(Utc::now);
    event
        .correlation_id
        .get_or_insert_with(|| Uuid::new_v4().to_string());
    event.causation_id.get_or_insert(event_id);

    event
}

struct Envelope<'a> {
    event_type: &'a str,
    version: &'a str,
    event_id: &'a str,
    key: &'a str,
    timestamp: DateTime<Utc>,
}

pub struct EventPublisher {
    producer: Arc<dyn BrokerProducer>,
    source: String,
    retry_config: RetryConfig,
    connected: AtomicBool,
}

impl EventPublisher {
    pub fn new(
        producer: Arc<dyn BrokerProducer>,
        source: impl Into<String>,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            producer,
            source: source.into(),
            retry_config,
            connected: AtomicBool::new(false),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub async fn connect(&self) -> Result<(), PublishError> {
        self.producer.connect().await?;
        self.connected.store(true, Ordering::SeqCst);

        info!(source = %self.source, "Event publisher connected");

        Ok(())
    }

    pub async fn disconnect(&self) -> Result<(), PublishError> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        self.producer.disconnect().await?;

        info!(source = %self.source, "Event publisher disconnected");

        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn ensure_connected(&self) -> Result<(), PublishError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(PublishError::NotConnected)
        }
    }

    /// Publishes one event, routed by type unless `topic` overrides it.
    /// Returns the enriched event as it was sent.
    pub async fn publish(
        &self,
        event: DomainEvent,
        topic: Option<Topic>,
    ) -> Result<DomainEvent, PublishError> {
        self.ensure_connected()?;

        let topic = topic.unwrap_or_else(|| route_for(event.event_type()));
        let event = enrich(event);
        let message = self.encode_event(topic, &event)?;

        self.producer.send(topic.as_str(), vec![message]).await?;

        debug!(
            event_id = event.event_id_or_unknown(),
            event_type = event.event_type(),
            aggregate_id = %event.aggregate_id,
            topic = %topic,
            "Event published"
        );

        Ok(event)
    }

    /// Sends every event to one topic in a single broker request. The topic
    /// defaults to the route of the first event.
    pub async fn publish_batch(
        &self,
        events: Vec<DomainEvent>,
        topic: Option<Topic>,
    ) -> Result<Vec<DomainEvent>, PublishError> {
        self.ensure_connected()?;

        let Some(first) = events.first() else {
            return Ok(Vec::new());
        };
        let topic = topic.unwrap_or_else(|| route_for(first.event_type()));

        let events: Vec<DomainEvent> = events.into_iter().map(enrich).collect();
        let messages = events
            .iter()
            .map(|event| self.encode_event(topic, event))
            .collect::<Result<Vec<_>, _>>()?;

        self.producer
            .send(topic.as_str(), messages)
            .await
            .map_err(|source| PublishError::Batch {
                topic: topic.to_string(),
                source,
            })?;

        info!(count = events.len(), topic = %topic, "Event batch published");

        Ok(events)
    }

    /// Sends each event to its own topic inside one broker transaction.
    /// Nothing becomes visible unless every send and the commit succeed.
    pub async fn publish_transaction(
        &self,
        events: Vec<DomainEvent>,
    ) -> Result<Vec<DomainEvent>, PublishError> {
        self.ensure_connected()?;

        let mut transaction = self
            .producer
            .begin_transaction()
            .await
            .map_err(|source| PublishError::TransactionAborted { source })?;

        let mut published = Vec::with_capacity(events.len());

        for event in events {
            let topic = route_for(event.event_type());
            let event = enrich(event);

            let message = match self.encode_event(topic, &event) {
                Ok(message) => message,
                Err(e) => {
                    Self::abort(transaction.as_mut()).await;
                    return Err(e);
                }
            };

            if let Err(source) = transaction.send(message).await {
                Self::abort(transaction.as_mut()).await;
                return Err(PublishError::TransactionAborted { source });
            }

            published.push(event);
        }

        if let Err(source) = transaction.commit().await {
            Self::abort(transaction.as_mut()).await;
            return Err(PublishError::TransactionAborted { source });
        }

        info!(count = published.len(), "Event transaction committed");

        Ok(published)
    }

    async fn abort(transaction: &mut dyn BrokerTransaction) {
        match transaction.abort().await {
            Ok(()) => warn!("Event transaction aborted"),
            Err(e) => error!(error = %e, "Failed to abort event transaction"),
        }
    }

    /// Wraps `original` with diagnostics and publishes it to the dead-letter topic.
    ///
    /// Failures are logged here. Callers on a failure path can drop the result.
    pub async fn send_to_dead_letter_queue(
        &self,
        original: &DomainEvent,
        error_message: &str,
        retry_count: u32,
    ) -> Result<DeadLetterEvent, PublishError> {
        let dead_letter = self.dead_letter_for(original, error_message, retry_count);

        match self.publish_dead_letter(&dead_letter).await {
            Ok(()) => {
                warn!(
                    original_event_id = %dead_letter.payload.original_event_id,
                    event_type = %dead_letter.event_type,
                    retry_count,
                    error = error_message,
                    "Event forwarded to dead-letter queue"
                );
                Ok(dead_letter)
            }
            Err(e) => {
                error!(
                    original_event_id = %dead_letter.payload.original_event_id,
                    error = %e,
                    "Failed to forward event to dead-letter queue"
                );
                Err(e)
            }
        }
    }

    pub fn dead_letter_for(
        &self,
        original: &DomainEvent,
        error_message: &str,
        retry_count: u32,
    ) -> DeadLetterEvent {
        let event_id = Uuid::new_v4().to_string();
        let now = Utc::now();

        DeadLetterEvent {
            event_type: DeadLetterEvent::dead_letter_type(original.event_type()),
            version: DEFAULT_EVENT_VERSION.to_string(),
            aggregate_id: original.aggregate_id.clone(),
            timestamp: now,
            correlation_id: original
                .correlation_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            causation_id: original
                .event_id
                .clone()
                .unwrap_or_else(|| event_id.clone()),
            event_id,
            payload: DeadLetterPayload {
                original_event: original.clone(),
                original_event_id: original.event_id_or_unknown().to_string(),
                error_message: error_message.to_string(),
                retry_count,
                failed_at: now,
                source: self.source.clone(),
            },
        }
    }

    async fn publish_dead_letter(&self, dead_letter: &DeadLetterEvent) -> Result<(), PublishError> {
        self.ensure_connected()?;

        let topic = Topic::DeadLetterQueue;
        let message = self.encode(
            topic,
            dead_letter,
            Envelope {
                event_type: &dead_letter.event_type,
                version: &dead_letter.version,
                event_id: &dead_letter.event_id,
                key: &dead_letter.aggregate_id,
                timestamp: dead_letter.timestamp,
            },
        )?;

        self.producer.send(topic.as_str(), vec![message]).await?;
        Ok(())
    }

    /// Publishes with bounded backoff. When every attempt fails the event goes
    /// to the dead-letter queue and the last error is returned.
    pub async fn publish_with_retry(
        &self,
        event: DomainEvent,
        topic: Option<Topic>,
    ) -> Result<DomainEvent, PublishError> {
        // Enrich up front so every attempt carries the same event id.
        let event = enrich(event);
        let attempts = AtomicU32::new(0);

        let result = retry_with_backoff(&self.retry_config, || {
            attempts.fetch_add(1, Ordering::Relaxed);
            self.publish(event.clone(), topic)
        })
        .await;

        match result {
            Ok(published) => Ok(published),
            Err(e) => {
                let _ = self
                    .send_to_dead_letter_queue(&event, &e.to_string(), attempts.load(Ordering::Relaxed))
                    .await;
                Err(e)
            }
        }
    }

    fn encode_event(&self, topic: Topic, event: &DomainEvent) -> Result<OutboundMessage, PublishError> {
        let event_id = event.event_id_or_unknown();
        self.encode(
            topic,
            event,
            Envelope {
                event_type: event.event_type(),
                version: &event.version,
                event_id,
                key: &event.aggregate_id,
                timestamp: event.timestamp.unwrap_or_else(Utc::now),
            },
        )
    }

    fn encode<T: Serialize>(
        &self,
        topic: Topic,
        value: &T,
        envelope: Envelope<'_>,
    ) -> Result<OutboundMessage, PublishError> {
        Ok(OutboundMessage {
            topic: topic.to_string(),
            key: envelope.key.to_string(),
            message_id: envelope.event_id.to_string(),
            value: serde_json::to_vec(value)?,
            headers: MessageHeaders {
                event_type: envelope.event_type.to_string(),
                version: envelope.version.to_string(),
                source: self.source.clone(),
                timestamp: envelope
                    .timestamp
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
            },
        })
    }
}
