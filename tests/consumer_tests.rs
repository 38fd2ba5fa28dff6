use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use notification_pipeline::{
    clients::{broker::BrokerProducer, in_memory::InMemoryBroker},
    models::{
        error::HandlerError,
        event::{DomainEvent, EventKind},
        message::{InboundMessage, MessageHeaders},
        topic::Topic,
    },
    pipeline::{
        consumer::{EventConsumer, EventHandler, MessageOutcome},
        publisher::EventPublisher,
    },
};
use tokio::{sync::watch, time::timeout};

use crate::common::{connected_broker, fast_retry, stock_updated, user_registered};

#[derive(Clone, Copy)]
enum Script {
    Ok,
    Fail,
    Panic,
}

/// Handler that records event ids and behaves per event id.
struct ScriptedHandler {
    seen: Mutex<Vec<String>>,
    scripts: Vec<(&'static str, Script)>,
}

impl ScriptedHandler {
    fn new(scripts: Vec<(&'static str, Script)>) -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
            scripts,
        })
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventHandler for ScriptedHandler {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn handle(&self, event: &DomainEvent) -> Result<(), HandlerError> {
        let id = event.event_id_or_unknown().to_string();
        self.seen.lock().unwrap().push(id.clone());

        let script = self
            .scripts
            .iter()
            .find(|(event_id, _)| *event_id == id)
            .map(|(_, script)| *script)
            .unwrap_or(Script::Ok);

        match script {
            Script::Ok => Ok(()),
            Script::Fail => Err(HandlerError::Failed("downstream rejected".to_string())),
            Script::Panic => panic!("handler bug"),
        }
    }
}

fn inbound(event: &DomainEvent, delivery_tag: u64) -> InboundMessage {
    InboundMessage {
        topic: "user-events".to_string(),
        key: event.aggregate_id.clone(),
        payload: serde_json::to_vec(event).unwrap(),
        headers: None,
        delivery_tag,
    }
}

fn consumer_for(broker: &InMemoryBroker, topics: impl IntoIterator<Item = Topic>) -> EventConsumer {
    EventConsumer::new("notifications", topics, Arc::new(broker.clone()))
}

/// Test: Messages are dispatched by event type
#[tokio::test]
async fn test_dispatch_by_event_type() -> Result<()> {
    let broker = connected_broker().await;
    let users = ScriptedHandler::new(vec![]);
    let stock = ScriptedHandler::new(vec![]);

    let mut consumer = consumer_for(&broker, [Topic::UserEvents, Topic::ProductEvents]);
    consumer
        .on(EventKind::UserRegistered, users.clone())
        .on(EventKind::StockUpdated, stock.clone());

    let outcome = consumer
        .process_message(&inbound(&user_registered("user-1", "a@shop.test"), 1))
        .await;
    assert!(matches!(outcome, MessageOutcome::Handled));

    consumer
        .process_message(&inbound(&stock_updated(500, 0), 2))
        .await;

    assert_eq!(users.seen(), vec!["evt-user-1"]);
    assert_eq!(stock.seen(), vec!["evt-stock-500-0"]);

    Ok(())
}

/// Test: Events without a registered handler are skipped
#[tokio::test]
async fn test_unhandled_event_type() -> Result<()> {
    let broker = connected_broker().await;
    let consumer = consumer_for(&broker, [Topic::UserEvents]);

    let outcome = consumer
        .process_message(&inbound(&user_registered("user-1", "a@shop.test"), 1))
        .await;

    assert!(matches!(
        outcome,
        MessageOutcome::NoHandler(EventKind::UserRegistered)
    ));
    assert!(!consumer.handles(EventKind::UserRegistered));

    Ok(())
}

/// Test: Failing and panicking handlers are contained
#[tokio::test]
async fn test_handler_faults_are_isolated() -> Result<()> {
    let broker = connected_broker().await;
    let handler = ScriptedHandler::new(vec![
        ("evt-user-1", Script::Fail),
        ("evt-user-2", Script::Panic),
    ]);

    let mut consumer = consumer_for(&broker, [Topic::UserEvents]);
    consumer.on(EventKind::UserRegistered, handler.clone());

    let failed = consumer
        .process_message(&inbound(&user_registered("user-1", "a@shop.test"), 1))
        .await;
    let panicked = consumer
        .process_message(&inbound(&user_registered("user-2", "b@shop.test"), 2))
        .await;
    let handled = consumer
        .process_message(&inbound(&user_registered("user-3", "c@shop.test"), 3))
        .await;

    assert!(matches!(failed, MessageOutcome::HandlerFailed(ref e) if e == "downstream rejected"));
    assert!(matches!(panicked, MessageOutcome::HandlerFailed(_)));
    assert!(matches!(handled, MessageOutcome::Handled));

    let metrics = consumer.metrics().snapshot();
    assert_eq!(metrics.processed, 3);
    assert_eq!(metrics.failed, 2);

    Ok(())
}

/// Test: Undecodable payloads are counted and skipped
#[tokio::test]
async fn test_undecodable_message() -> Result<()> {
    let broker = connected_broker().await;
    let consumer = consumer_for(&broker, [Topic::UserEvents]);

    let message = InboundMessage {
        topic: "user-events".to_string(),
        key: "user-1".to_string(),
        payload: b"{not json".to_vec(),
        headers: Some(MessageHeaders {
            event_type: "UserRegistered".to_string(),
            version: "1.0".to_string(),
            source: "test".to_string(),
            timestamp: "2024-05-01T12:00:00.000Z".to_string(),
        }),
        delivery_tag: 9,
    };

    let outcome = consumer.process_message(&message).await;

    assert!(matches!(outcome, MessageOutcome::Undecodable(_)));
    assert_eq!(consumer.metrics().snapshot().undecodable, 1);

    Ok(())
}

/// Test: The run loop acks every message and keeps going after a failure
#[tokio::test]
async fn test_run_acks_and_continues_after_failure() -> Result<()> {
    let broker = connected_broker().await;
    let publisher = EventPublisher::new(Arc::new(broker.clone()), "test", fast_retry());
    publisher.connect().await?;

    let handler = ScriptedHandler::new(vec![("evt-user-1", Script::Fail)]);
    let mut consumer = consumer_for(&broker, [Topic::UserEvents]);
    consumer.on(EventKind::UserRegistered, handler.clone());
    let consumer = Arc::new(consumer);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn({
        let consumer = Arc::clone(&consumer);
        async move { consumer.run(shutdown_rx).await }
    });

    for user in ["user-1", "user-2", "user-3"] {
        publisher
            .publish(user_registered(user, "x@shop.test"), None)
            .await?;
    }

    timeout(Duration::from_secs(5), async {
        while broker.acked_tags().len() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;

    shutdown_tx.send(true)?;
    timeout(Duration::from_secs(5), task).await???;

    assert_eq!(handler.seen(), vec!["evt-user-1", "evt-user-2", "evt-user-3"]);
    assert_eq!(broker.acked_tags().len(), 3);
    assert_eq!(consumer.metrics().snapshot().failed, 1);

    Ok(())
}

/// Test: Dead-letter envelopes on a subscribed topic are acked and skipped
#[tokio::test]
async fn test_run_skips_dead_letters() -> Result<()> {
    let broker = connected_broker().await;
    let publisher = EventPublisher::new(Arc::new(broker.clone()), "test", fast_retry());
    publisher.connect().await?;

    publisher
        .send_to_dead_letter_queue(&user_registered("user-1", "a@shop.test"), "boom", 3)
        .await?;

    let consumer = Arc::new(consumer_for(&broker, [Topic::DeadLetterQueue]));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn({
        let consumer = Arc::clone(&consumer);
        async move { consumer.run(shutdown_rx).await }
    });

    timeout(Duration::from_secs(5), async {
        while broker.acked_tags().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;

    shutdown_tx.send(true)?;
    timeout(Duration::from_secs(5), task).await???;

    assert_eq!(consumer.metrics().snapshot().undecodable, 1);

    Ok(())
}

/// Test: The run loop exits when the broker stream closes
#[tokio::test]
async fn test_run_stops_when_stream_closes() -> Result<()> {
    let broker = connected_broker().await;
    let consumer = Arc::new(consumer_for(&broker, [Topic::UserEvents]));

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn({
        let consumer = Arc::clone(&consumer);
        async move { consumer.run(shutdown_rx).await }
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    broker.disconnect().await?;

    timeout(Duration::from_secs(5), task).await???;

    Ok(())
}
