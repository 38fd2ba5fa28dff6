//! Consumer group runner.
//!
//! Messages are decoded into [`DomainEvent`] and dispatched by variant, not by
//! topic, since one topic carries several event types. Every message is acked
//! once dispatch returns, whether the handler succeeded or not, so a poison
//! message cannot stall its partition. Delivery is at least once: handlers
//! must tolerate seeing the same `eventId` again.

use std::{
    collections::HashMap,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use futures_util::{FutureExt, StreamExt};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::{
    clients::broker::BrokerConsumer,
    models::{
        error::{BrokerError, HandlerError},
        event::{DomainEvent, EventKind},
        message::InboundMessage,
        topic::Topic,
    },
    utils::panic_message,
};

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, event: &DomainEvent) -> Result<(), HandlerError>;
}

#[derive(Debug, Default)]
pub struct ConsumerMetrics {
    processed: AtomicU64,
    failed: AtomicU64,
    undecodable: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub processed: u64,
    pub failed: u64,
    pub undecodable: u64,
}

impl ConsumerMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            undecodable: self.undecodable.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
pub enum MessageOutcome {
    Handled,
    NoHandler(EventKind),
    HandlerFailed(String),
    Undecodable(String),
}

pub struct EventConsumer {
    group: String,
    topics: Vec<Topic>,
    broker: Arc<dyn BrokerConsumer>,
    handlers: HashMap<EventKind, Arc<dyn EventHandler>>,
    metrics: Arc<ConsumerMetrics>,
}

impl EventConsumer {
    pub fn new(
        group: impl Into<String>,
        topics: impl IntoIterator<Item = Topic>,
        broker: Arc<dyn BrokerConsumer>,
    ) -> Self {
        Self {
            group: group.into(),
            topics: topics.into_iter().collect(),
            broker,
            handlers: HashMap::new(),
            metrics: Arc::new(ConsumerMetrics::default()),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Registers the handler for `kind`. A second registration replaces the first.
    pub fn on(&mut self, kind: EventKind, handler: Arc<dyn EventHandler>) -> &mut Self {
        if let Some(previous) = self.handlers.insert(kind, handler) {
            warn!(
                event_type = kind.as_str(),
                replaced = previous.name(),
                "Event handler replaced"
            );
        }
        self
    }

    pub fn on_each(
        &mut self,
        kinds: impl IntoIterator<Item = EventKind>,
        handler: Arc<dyn EventHandler>,
    ) -> &mut Self {
        for kind in kinds {
            self.on(kind, Arc::clone(&handler));
        }
        self
    }

    pub fn handles(&self, kind: EventKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub fn metrics(&self) -> Arc<ConsumerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Decodes and dispatches one message. Never fails: every problem is
    /// logged and reported in the outcome.
    pub async fn process_message(&self, message: &InboundMessage) -> MessageOutcome {
        let event: DomainEvent = match serde_json::from_slice(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                self.metrics.undecodable.fetch_add(1, Ordering::Relaxed);
                warn!(
                    topic = %message.topic,
                    key = %message.key,
                    event_type = message.headers.as_ref().map(|h| h.event_type.as_str()),
                    error = %e,
                    "Skipping undecodable message"
                );
                return MessageOutcome::Undecodable(e.to_string());
            }
        };

        let kind = event.kind();
        let Some(handler) = self.handlers.get(&kind) else {
            self.metrics.processed.fetch_add(1, Ordering::Relaxed);
            debug!(event_type = kind.as_str(), "No handler registered, skipping");
            return MessageOutcome::NoHandler(kind);
        };

        let result = AssertUnwindSafe(handler.handle(&event))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(HandlerError::Panicked(panic_message(panic.as_ref()))));

        self.metrics.processed.fetch_add(1, Ordering::Relaxed);

        match result {
            Ok(()) => {
                debug!(
                    event_id = event.event_id_or_unknown(),
                    event_type = kind.as_str(),
                    handler = handler.name(),
                    "Event handled"
                );
                MessageOutcome::Handled
            }
            Err(e) => {
                self.metrics.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    event_id = event.event_id_or_unknown(),
                    event_type = kind.as_str(),
                    handler = handler.name(),
                    error = %e,
                    "Event handler failed"
                );
                MessageOutcome::HandlerFailed(e.to_string())
            }
        }
    }

    /// Consumes until `shutdown` flips to true or the broker stream ends.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), BrokerError> {
        let topics: Vec<&str> = self.topics.iter().map(Topic::as_str).collect();
        let mut stream = self.broker.subscribe(&self.group, &topics).await?;

        info!(group = %self.group, topics = ?topics, "Consumer started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                next = stream.next() => match next {
                    Some(Ok(message)) => {
                        self.process_message(&message).await;

                        if let Err(e) = self.broker.ack(&message).await {
                            error!(
                                topic = %message.topic,
                                delivery_tag = message.delivery_tag,
                                error = %e,
                                "Failed to ack message"
                            );
                        }
                    }
                    Some(Err(e)) => {
                        error!(group = %self.group, error = %e, "Broker stream error");
                    }
                    None => {
                        warn!(group = %self.group, "Broker stream closed");
                        break;
                    }
                },
            }
        }

        info!(
            group = %self.group,
            metrics = ?self.metrics.snapshot(),
            "Consumer stopped"
        );

        Ok(())
    }
}
