//! In-process broker with ordered per-topic logs and per-group cursors.
//!
//! Backs the test suite and local runs started with `RABBITMQ_URL=memory://`.
//! Delivery follows the same contract as the RabbitMQ binding: every group
//! sees every message of its topics, in send order.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use futures_util::stream;
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};

use crate::{
    clients::broker::{BrokerConsumer, BrokerProducer, BrokerTransaction, MessageStream},
    models::{
        error::BrokerError,
        message::{InboundMessage, OutboundMessage},
    },
};

#[derive(Default)]
struct BrokerState {
    connected: bool,
    topics: HashMap<String, Vec<OutboundMessage>>,
    sent: Vec<OutboundMessage>,
    cursors: HashMap<(String, String), usize>,
    subscribers: Vec<Subscriber>,
    acked: Vec<u64>,
    next_delivery_tag: u64,
    fail_next_sends: u32,
    committed_transactions: u32,
    aborted_transactions: u32,
}

struct Subscriber {
    group: String,
    topics: Vec<String>,
    sender: UnboundedSender<Result<InboundMessage, BrokerError>>,
}

impl BrokerState {
    fn append(&mut self, topic: &str, message: OutboundMessage) {
        self.sent.push(message.clone());
        self.topics.entry(topic.to_string()).or_default().push(message);
        self.deliver_pending(topic);
    }

    /// Pushes every message a live group has not seen yet.
    fn deliver_pending(&mut self, topic: &str) {
        self.subscribers.retain(|subscriber| !subscriber.sender.is_closed());

        let log_len = self.topics.get(topic).map_or(0, Vec::len);
        let groups: Vec<String> = self
            .subscribers
            .iter()
            .filter(|subscriber| subscriber.topics.iter().any(|t| t == topic))
            .map(|subscriber| subscriber.group.clone())
            .collect();

        for group in groups {
            let cursor_key = (group.clone(), topic.to_string());
            let start = self.cursors.get(&cursor_key).copied().unwrap_or(0);

            for offset in start..log_len {
                let message = self.topics[topic][offset].clone();
                self.next_delivery_tag += 1;
                let inbound = InboundMessage {
                    topic: topic.to_string(),
                    key: message.key,
                    payload: message.value,
                    headers: Some(message.headers),
                    delivery_tag: self.next_delivery_tag,
                };

                let Some(subscriber) = self
                    .subscribers
                    .iter()
                    .find(|s| s.group == group && s.topics.iter().any(|t| t == topic))
                else {
                    break;
                };
                if subscriber.sender.send(Ok(inbound)).is_err() {
                    break;
                }
                self.cursors.insert(cursor_key.clone(), offset + 1);
            }
        }
    }

    fn take_failure(&mut self, topic: &str) -> Result<(), BrokerError> {
        if self.fail_next_sends > 0 {
            self.fail_next_sends -= 1;
            return Err(BrokerError::Rejected {
                topic: topic.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes the next `count` sends fail, including sends inside a transaction.
    pub fn fail_next_sends(&self, count: u32) {
        self.lock().fail_next_sends = count;
    }

    /// Every message that reached a topic, in send order.
    pub fn sent_messages(&self) -> Vec<OutboundMessage> {
        self.lock().sent.clone()
    }

    pub fn messages_for(&self, topic: &str) -> Vec<OutboundMessage> {
        self.lock().topics.get(topic).cloned().unwrap_or_default()
    }

    pub fn acked_tags(&self) -> Vec<u64> {
        self.lock().acked.clone()
    }

    pub fn committed_transactions(&self) -> u32 {
        self.lock().committed_transactions
    }

    pub fn aborted_transactions(&self) -> u32 {
        self.lock().aborted_transactions
    }
}

#[async_trait]
impl BrokerProducer for InMemoryBroker {
    async fn connect(&self) -> Result<(), BrokerError> {
        self.lock().connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        let mut state = self.lock();
        state.connected = false;
        state.subscribers.clear();
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.lock().connected
    }

    async fn send(&self, topic: &str, messages: Vec<OutboundMessage>) -> Result<(), BrokerError> {
        let mut state = self.lock();
        if !state.connected {
            return Err(BrokerError::NotConnected);
        }
        state.take_failure(topic)?;

        for message in messages {
            state.append(topic, message);
        }
        Ok(())
    }

    async fn begin_transaction(&self) -> Result<Box<dyn BrokerTransaction>, BrokerError> {
        if !self.lock().connected {
            return Err(BrokerError::NotConnected);
        }

        Ok(Box::new(InMemoryTransaction {
            broker: self.clone(),
            staged: Vec::new(),
            finished: false,
        }))
    }
}

#[async_trait]
impl BrokerConsumer for InMemoryBroker {
    async fn subscribe(&self, group: &str, topics: &[&str]) -> Result<MessageStream, BrokerError> {
        let (sender, mut receiver) = unbounded_channel();

        {
            let mut state = self.lock();
            if !state.connected {
                return Err(BrokerError::NotConnected);
            }
            state.subscribers.push(Subscriber {
                group: group.to_string(),
                topics: topics.iter().map(|t| t.to_string()).collect(),
                sender,
            });
            for topic in topics {
                state.deliver_pending(topic);
            }
        }

        Ok(Box::pin(stream::poll_fn(move |cx| receiver.poll_recv(cx))))
    }

    async fn ack(&self, message: &InboundMessage) -> Result<(), BrokerError> {
        self.lock().acked.push(message.delivery_tag);
        Ok(())
    }
}

struct InMemoryTransaction {
    broker: InMemoryBroker,
    staged: Vec<OutboundMessage>,
    finished: bool,
}

#[async_trait]
impl BrokerTransaction for InMemoryTransaction {
    async fn send(&mut self, message: OutboundMessage) -> Result<(), BrokerError> {
        if self.finished {
            return Err(BrokerError::Transaction("transaction already finished".to_string()));
        }
        self.broker.lock().take_failure(&message.topic)?;
        self.staged.push(message);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), BrokerError> {
        if self.finished {
            return Err(BrokerError::Transaction("transaction already finished".to_string()));
        }
        self.finished = true;

        let mut state = self.broker.lock();
        for message in self.staged.drain(..) {
            let topic = message.topic.clone();
            state.append(&topic, message);
        }
        state.committed_transactions += 1;
        Ok(())
    }

    async fn abort(&mut self) -> Result<(), BrokerError> {
        self.finished = true;
        self.staged.clear();
        self.broker.lock().aborted_transactions += 1;
        Ok(())
    }
}
