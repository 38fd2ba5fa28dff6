use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::event::DomainEvent;

pub const DEAD_LETTER_PREFIX: &str = "DeadLetter_";

/// Headers mirrored from the envelope so consumers can filter without decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageHeaders {
    pub event_type: String,
    pub version: String,
    pub source: String,
    pub timestamp: String,
}

/// A serialized event ready for the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub topic: String,
    pub key: String,
    pub message_id: String,
    pub value: Vec<u8>,
    pub headers: MessageHeaders,
}

/// A message handed to a consumer group by the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
    pub headers: Option<MessageHeaders>,
    pub delivery_tag: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterPayload {
    pub original_event: DomainEvent,
    pub original_event_id: String,
    pub error_message: String,
    pub retry_count: u32,
    pub failed_at: DateTime<Utc>,
    pub source: String,
}

/// Envelope for an event that could not be delivered. The event type is
/// derived from the original, so this is not a [`DomainEvent`] variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterEvent {
    pub event_type: String,
    pub version: String,
    pub event_id: String,
    pub aggregate_id: String,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: String,
    pub causation_id: String,
    pub payload: DeadLetterPayload,
}

impl DeadLetterEvent {
    pub fn dead_letter_type(original_event_type: &str) -> String {
        format!("{}{}", DEAD_LETTER_PREFIX, original_event_type)
    }
}
