use std::fmt::{Display, Formatter, Result as FmtResult};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_EVENT_VERSION: &str = "1.0";

fn default_version() -> String {
    DEFAULT_EVENT_VERSION.to_string()
}

/// Envelope for every business occurrence that travels over the broker.
///
/// `event_id`, `timestamp`, `correlation_id` and `causation_id` may be absent
/// when a producer builds the event; the publisher fills them in before the
/// event leaves the process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,

    pub aggregate_id: String,

    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,

    #[serde(flatten)]
    pub payload: EventPayload,
}

impl DomainEvent {
    /// Builds an event keyed by the aggregate its payload belongs to.
    pub fn new(payload: EventPayload) -> Self {
        Self {
            event_id: None,
            aggregate_id: payload.aggregate_id().to_string(),
            version: default_version(),
            timestamp: None,
            correlation_id: None,
            causation_id: None,
            payload,
        }
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    pub fn with_aggregate_id(mut self, aggregate_id: impl Into<String>) -> Self {
        self.aggregate_id = aggregate_id.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_causation_id(mut self, causation_id: impl Into<String>) -> Self {
        self.causation_id = Some(causation_id.into());
        self
    }

    /// Marks this event as caused by `parent`, inheriting its correlation chain.
    pub fn caused_by(mut self, parent: &DomainEvent) -> Self {
        self.correlation_id = parent.correlation_id.clone();
        self.causation_id = parent.event_id.clone();
        self
    }

    pub fn event_type(&self) -> &'static str {
        self.payload.kind().as_str()
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn event_id_or_unknown(&self) -> &str {
        self.event_id.as_deref().unwrap_or("unknown")
    }

    pub fn is_enriched(&self) -> bool {
        self.event_id.is_some()
            && self.timestamp.is_some()
            && self.correlation_id.is_some()
            && self.causation_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", content = "payload")]
pub enum EventPayload {
    UserRegistered(UserRegistered),
    UserProfileUpdated(UserProfileUpdated),
    PasswordResetRequested(PasswordResetRequested),
    ProductCreated(ProductCreated),
    ProductUpdated(ProductUpdated),
    StockUpdated(StockUpdated),
    LowStockAlert(LowStockAlert),
    OrderCreated(OrderCreated),
    OrderStatusUpdated(OrderStatusUpdated),
    OrderCancelled(OrderCancelled),
    PaymentCompleted(PaymentCompleted),
    PaymentFailed(PaymentFailed),
    CartItemAdded(CartItemAdded),
    CartAbandoned(CartAbandoned),
    ServiceStarted(ServiceLifecycle),
    ServiceStopped(ServiceLifecycle),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::UserRegistered(_) => EventKind::UserRegistered,
            EventPayload::UserProfileUpdated(_) => EventKind::UserProfileUpdated,
            EventPayload::PasswordResetRequested(_) => EventKind::PasswordResetRequested,
            EventPayload::ProductCreated(_) => EventKind::ProductCreated,
            EventPayload::ProductUpdated(_) => EventKind::ProductUpdated,
            EventPayload::StockUpdated(_) => EventKind::StockUpdated,
            EventPayload::LowStockAlert(_) => EventKind::LowStockAlert,
            EventPayload::OrderCreated(_) => EventKind::OrderCreated,
            EventPayload::OrderStatusUpdated(_) => EventKind::OrderStatusUpdated,
            EventPayload::OrderCancelled(_) => EventKind::OrderCancelled,
            EventPayload::PaymentCompleted(_) => EventKind::PaymentCompleted,
            EventPayload::PaymentFailed(_) => EventKind::PaymentFailed,
            EventPayload::CartItemAdded(_) => EventKind::CartItemAdded,
            EventPayload::CartAbandoned(_) => EventKind::CartAbandoned,
            EventPayload::ServiceStarted(_) => EventKind::ServiceStarted,
            EventPayload::ServiceStopped(_) => EventKind::ServiceStopped,
        }
    }

    /// Identifier of the aggregate the payload describes; used as partition key.
    pub fn aggregate_id(&self) -> &str {
        match self {
            EventPayload::UserRegistered(p) => &p.user_id,
            EventPayload::UserProfileUpdated(p) => &p.user_id,
            EventPayload::PasswordResetRequested(p) => &p.user_id,
            EventPayload::ProductCreated(p) => &p.product_id,
            EventPayload::ProductUpdated(p) => &p.product_id,
            EventPayload::StockUpdated(p) => &p.product_id,
            EventPayload::LowStockAlert(p) => &p.product_id,
            EventPayload::OrderCreated(p) => &p.order_id,
            EventPayload::OrderStatusUpdated(p) => &p.order_id,
            EventPayload::OrderCancelled(p) => &p.order_id,
            EventPayload::PaymentCompleted(p) => &p.order_id,
            EventPayload::PaymentFailed(p) => &p.order_id,
            EventPayload::CartItemAdded(p) => &p.cart_id,
            EventPayload::CartAbandoned(p) => &p.cart_id,
            EventPayload::ServiceStarted(p) => &p.instance_id,
            EventPayload::ServiceStopped(p) => &p.instance_id,
        }
    }
}

/// Discriminant of [`EventPayload`], used to register consumer handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    UserRegistered,
    UserProfileUpdated,
    PasswordResetRequested,
    ProductCreated,
    ProductUpdated,
    StockUpdated,
    LowStockAlert,
    OrderCreated,
    OrderStatusUpdated,
    OrderCancelled,
    PaymentCompleted,
    PaymentFailed,
    CartItemAdded,
    CartAbandoned,
    ServiceStarted,
    ServiceStopped,
}

impl EventKind {
    pub const ALL: [EventKind; 16] = [
        EventKind::UserRegistered,
        EventKind::UserProfileUpdated,
        EventKind::PasswordResetRequested,
        EventKind::ProductCreated,
        EventKind::ProductUpdated,
        EventKind::StockUpdated,
        EventKind::LowStockAlert,
        EventKind::OrderCreated,
        EventKind::OrderStatusUpdated,
        EventKind::OrderCancelled,
        EventKind::PaymentCompleted,
        EventKind::PaymentFailed,
        EventKind::CartItemAdded,
        EventKind::CartAbandoned,
        EventKind::ServiceStarted,
        EventKind::ServiceStopped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::UserRegistered => "UserRegistered",
            EventKind::UserProfileUpdated => "UserProfileUpdated",
            EventKind::PasswordResetRequested => "PasswordResetRequested",
            EventKind::ProductCreated => "ProductCreated",
            EventKind::ProductUpdated => "ProductUpdated",
            EventKind::StockUpdated => "StockUpdated",
            EventKind::LowStockAlert => "LowStockAlert",
            EventKind::OrderCreated => "OrderCreated",
            EventKind::OrderStatusUpdated => "OrderStatusUpdated",
            EventKind::OrderCancelled => "OrderCancelled",
            EventKind::PaymentCompleted => "PaymentCompleted",
            EventKind::PaymentFailed => "PaymentFailed",
            EventKind::CartItemAdded => "CartItemAdded",
            EventKind::CartAbandoned => "CartAbandoned",
            EventKind::ServiceStarted => "ServiceStarted",
            EventKind::ServiceStopped => "ServiceStopped",
        }
    }
}

impl Display for EventKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRegistered {
    pub user_id: String,
    pub email: String,
    pub first_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfileUpdated {
    pub user_id: String,

    #[serde(default)]
    pub changed_fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordResetRequested {
    pub user_id: String,
    pub email: String,
    pub reset_token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductCreated {
    pub product_id: String,
    pub name: String,
    pub price: f64,
    pub stock: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductUpdated {
    pub product_id: String,

    #[serde(default)]
    pub changed_fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockUpdated {
    pub product_id: String,
    pub product_name: String,
    pub previous_quantity: i64,
    pub new_quantity: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl StockUpdated {
    /// Size of the change, whatever its direction.
    pub fn delta(&self) -> u64 {
        self.new_quantity.abs_diff(self.previous_quantity)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrgencyLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl UrgencyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            UrgencyLevel::Low => "low",
            UrgencyLevel::Medium => "medium",
            UrgencyLevel::High => "high",
            UrgencyLevel::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LowStockAlert {
    pub product_id: String,
    pub product_name: String,
    pub current_stock: i64,
    pub threshold: i64,
    pub urgency_level: UrgencyLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Preparing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Preparing => "preparing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    pub order_id: String,
    pub user_id: String,
    pub user_email: String,
    pub total_amount: f64,
    pub item_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusUpdated {
    pub order_id: String,
    pub user_id: String,
    pub user_email: String,
    pub previous_status: OrderStatus,
    pub new_status: OrderStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCancelled {
    pub order_id: String,
    pub user_id: String,
    pub user_email: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCompleted {
    pub order_id: String,
    pub user_id: String,
    pub user_email: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_phone: Option<String>,

    pub amount: f64,
    pub payment_method: String,
    pub transaction_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentFailed {
    pub order_id: String,
    pub user_id: String,
    pub user_email: String,
    pub amount: f64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItemAdded {
    pub cart_id: String,
    pub user_id: String,
    pub product_id: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartAbandoned {
    pub cart_id: String,
    pub user_id: String,
    pub user_email: String,
    pub item_count: u32,
    pub total_value: f64,
    pub abandoned_duration_minutes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceLifecycle {
    pub service_name: String,
    pub instance_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
