use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::models::status::{NotificationStatus, NotificationType};

/// One attempted notification. Written once, never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationLog {
    pub event_id: String,
    pub event_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cart_id: Option<String>,

    pub notification_type: NotificationType,
    pub recipient: String,
    pub status: NotificationStatus,
    pub template: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub sent_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,

    #[serde(default)]
    pub metadata: JsonValue,
}

impl NotificationLog {
    pub fn new(
        event_id: impl Into<String>,
        event_type: impl Into<String>,
        notification_type: NotificationType,
        recipient: impl Into<String>,
        template: impl Into<String>,
        status: NotificationStatus,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            event_type: event_type.into(),
            user_id: None,
            order_id: None,
            product_id: None,
            cart_id: None,
            notification_type,
            recipient: recipient.into(),
            status,
            template: template.into(),
            error: None,
            sent_at: Utc::now(),
            delivered_at: None,
            retry_count: None,
            metadata: serde_json::json!({}),
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_order_id(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    pub fn with_product_id(mut self, product_id: impl Into<String>) -> Self {
        self.product_id = Some(product_id.into());
        self
    }

    pub fn with_cart_id(mut self, cart_id: impl Into<String>) -> Self {
        self.cart_id = Some(cart_id.into());
        self
    }

    pub fn with_sent_at(mut self, sent_at: DateTime<Utc>) -> Self {
        self.sent_at = sent_at;
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    pub fn is_failed(&self) -> bool {
        self.status == NotificationStatus::Failed
    }
}

/// Query over the in-memory log buffer. Every field narrows the result.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_type: Option<NotificationType>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<NotificationStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
}

impl LogFilter {
    pub fn matches(&self, log: &NotificationLog) -> bool {
        if let Some(event_type) = &self.event_type {
            if &log.event_type != event_type {
                return false;
            }
        }
        if let Some(notification_type) = self.notification_type {
            if log.notification_type != notification_type {
                return false;
            }
        }
        if let Some(status) = self.status {
            if log.status != status {
                return false;
            }
        }
        if let Some(user_id) = &self.user_id {
            if log.user_id.as_ref() != Some(user_id) {
                return false;
            }
        }
        if let Some(start) = self.start_date {
            if log.sent_at < start {
                return false;
            }
        }
        if let Some(end) = self.end_date {
            if log.sent_at > end {
                return false;
            }
        }
        true
    }
}
