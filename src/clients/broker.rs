//! Broker seam shared by the publisher and the consumer.
//!
//! The pipeline assumes the broker keeps messages with the same key in order,
//! delivers at least once, and confirms each send before reporting success.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::models::{
    error::BrokerError,
    message::{InboundMessage, OutboundMessage},
};

pub type MessageStream = Pin<Box<dyn Stream<Item = Result<InboundMessage, BrokerError>> + Send>>;

#[async_trait]
pub trait BrokerProducer: Send + Sync {
    async fn connect(&self) -> Result<(), BrokerError>;

    async fn disconnect(&self) -> Result<(), BrokerError>;

    async fn is_connected(&self) -> bool;

    /// Sends `messages` to `topic` as a single request. Either every message is
    /// confirmed or the whole call fails.
    async fn send(&self, topic: &str, messages: Vec<OutboundMessage>) -> Result<(), BrokerError>;

    async fn begin_transaction(&self) -> Result<Box<dyn BrokerTransaction>, BrokerError>;
}

/// Messages sent through a transaction become visible only after `commit`.
#[async_trait]
pub trait BrokerTransaction: Send {
    async fn send(&mut self, message: OutboundMessage) -> Result<(), BrokerError>;

    async fn commit(&mut self) -> Result<(), BrokerError>;

    async fn abort(&mut self) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait BrokerConsumer: Send + Sync {
    /// Joins `group` on every topic in `topics`. Each group receives its own
    /// copy of every message.
    async fn subscribe(&self, group: &str, topics: &[&str]) -> Result<MessageStream, BrokerError>;

    async fn ack(&self, message: &InboundMessage) -> Result<(), BrokerError>;
}
