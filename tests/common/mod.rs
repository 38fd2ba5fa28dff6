#![allow(dead_code)]

use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notification_pipeline::{
    api::AppState,
    clients::{
        broker::BrokerProducer,
        channel::{NotificationChannel, SendOutcome},
        health::HealthChecker,
        in_memory::InMemoryBroker,
        redis::DeliveryLedger,
    },
    models::{
        error::LedgerError,
        event::{
            CartAbandoned, DomainEvent, EventPayload, LowStockAlert, OrderStatus,
            OrderStatusUpdated, PaymentCompleted, StockUpdated, UrgencyLevel, UserRegistered,
        },
        notification::NotificationLog,
        retry::RetryConfig,
        status::{ChannelKind, IdempotencyStatus, NotificationStatus, NotificationType},
    },
    pipeline::{
        handlers::NotificationHandlers, logger::NotificationLogger, rate_limit::TestSendLimiter,
        templates::TemplateCatalog,
    },
};
use serde_json::Value as JsonValue;

pub const ADMIN_EMAIL: &str = "ops@shop.test";
pub const ADMIN_PHONE: &str = "+15550000000";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    Succeed,
    Fail,
    Panic,
}

#[derive(Debug, Clone)]
pub struct SentNotification {
    pub template: String,
    pub recipient: String,
    pub data: JsonValue,
}

/// Channel double that records every send.
pub struct RecordingChannel {
    kind: ChannelKind,
    behaviour: Mutex<Behaviour>,
    sent: Mutex<Vec<SentNotification>>,
}

impl RecordingChannel {
    pub fn new(kind: ChannelKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            behaviour: Mutex::new(Behaviour::Succeed),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(kind: ChannelKind) -> Arc<Self> {
        let channel = Self::new(kind);
        channel.set_behaviour(Behaviour::Fail);
        channel
    }

    pub fn set_behaviour(&self, behaviour: Behaviour) {
        *self.behaviour.lock().unwrap() = behaviour;
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn send(&self, template: &str, recipient: &str, data: &JsonValue) -> SendOutcome {
        let behaviour = *self.behaviour.lock().unwrap();
        self.sent.lock().unwrap().push(SentNotification {
            template: template.to_string(),
            recipient: recipient.to_string(),
            data: data.clone(),
        });

        match behaviour {
            Behaviour::Succeed => SendOutcome::delivered(format!("{} sent", self.kind)),
            Behaviour::Fail => SendOutcome::failed("provider unavailable"),
            Behaviour::Panic => panic!("provider client blew up"),
        }
    }
}

#[derive(Default)]
pub struct MemoryLedger {
    entries: Mutex<HashMap<String, IdempotencyStatus>>,
}

impl MemoryLedger {
    pub fn status(&self, key: &str) -> Option<IdempotencyStatus> {
        self.entries.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl DeliveryLedger for MemoryLedger {
    async fn check(&self, key: &str) -> Result<IdempotencyStatus, LedgerError> {
        Ok(self.status(key).unwrap_or(IdempotencyStatus::NotFound))
    }

    async fn mark_processing(&self, key: &str) -> Result<(), LedgerError> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), IdempotencyStatus::Processing);
        Ok(())
    }

    async fn mark_sent(&self, key: &str) -> Result<(), LedgerError> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), IdempotencyStatus::Sent);
        Ok(())
    }

    async fn mark_failed(&self, key: &str) -> Result<(), LedgerError> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), IdempotencyStatus::Failed);
        Ok(())
    }
}

/// Ledger double whose lookups panic.
pub struct PanickingLedger;

#[async_trait]
impl DeliveryLedger for PanickingLedger {
    async fn check(&self, _key: &str) -> Result<IdempotencyStatus, LedgerError> {
        panic!("ledger connection poisoned")
    }

    async fn mark_processing(&self, _key: &str) -> Result<(), LedgerError> {
        Ok(())
    }

    async fn mark_sent(&self, _key: &str) -> Result<(), LedgerError> {
        Ok(())
    }

    async fn mark_failed(&self, _key: &str) -> Result<(), LedgerError> {
        Ok(())
    }
}

pub struct Harness {
    pub email: Arc<RecordingChannel>,
    pub sms: Arc<RecordingChannel>,
    pub logger: Arc<NotificationLogger>,
    pub handlers: NotificationHandlers,
    _log_dir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_channels(
            RecordingChannel::new(ChannelKind::Email),
            RecordingChannel::new(ChannelKind::Sms),
        )
    }

    pub fn with_channels(email: Arc<RecordingChannel>, sms: Arc<RecordingChannel>) -> Self {
        let log_dir = tempfile::tempdir().unwrap();
        let logger = Arc::new(NotificationLogger::new(log_dir.path(), 1000));
        let handlers = NotificationHandlers::new(
            email.clone(),
            sms.clone(),
            logger.clone(),
            ADMIN_EMAIL,
        )
        .with_admin_phone(ADMIN_PHONE);

        Self {
            email,
            sms,
            logger,
            handlers,
            _log_dir: log_dir,
        }
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn DeliveryLedger>) -> Self {
        self.handlers = self.handlers.with_ledger(ledger);
        self
    }

    pub fn logs(&self) -> Vec<NotificationLog> {
        self.logger.get_recent_logs(usize::MAX)
    }
}

pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay_ms: 1,
        max_delay_ms: 5,
        backoff_multiplier: 2,
    }
}

pub async fn connected_broker() -> InMemoryBroker {
    let broker = InMemoryBroker::new();
    broker.connect().await.unwrap();
    broker
}

pub fn user_registered(user_id: &str, email: &str) -> DomainEvent {
    DomainEvent::new(EventPayload::UserRegistered(UserRegistered {
        user_id: user_id.to_string(),
        email: email.to_string(),
        first_name: "Ada".to_string(),
        last_name: Some("Lovelace".to_string()),
        phone: None,
    }))
    .with_event_id(format!("evt-{}", user_id))
}

pub fn stock_updated(previous: i64, new: i64) -> DomainEvent {
    DomainEvent::new(EventPayload::StockUpdated(StockUpdated {
        product_id: "prod-1".to_string(),
        product_name: "Espresso Beans".to_string(),
        previous_quantity: previous,
        new_quantity: new,
        reason: None,
    }))
    .with_event_id(format!("evt-stock-{}-{}", previous, new))
}

pub fn low_stock(urgency: UrgencyLevel) -> DomainEvent {
    DomainEvent::new(EventPayload::LowStockAlert(LowStockAlert {
        product_id: "prod-2".to_string(),
        product_name: "Oat Milk".to_string(),
        current_stock: 3,
        threshold: 10,
        urgency_level: urgency,
    }))
    .with_event_id(format!("evt-low-{}", urgency.as_str()))
}

pub fn order_status(previous: OrderStatus, new: OrderStatus) -> DomainEvent {
    DomainEvent::new(EventPayload::OrderStatusUpdated(OrderStatusUpdated {
        order_id: "order-9".to_string(),
        user_id: "user-9".to_string(),
        user_email: "buyer@shop.test".to_string(),
        previous_status: previous,
        new_status: new,
        tracking_number: Some("TRK123".to_string()),
    }))
    .with_event_id(format!("evt-order-{}", new.as_str()))
}

pub fn cart_abandoned(minutes: u64) -> DomainEvent {
    DomainEvent::new(EventPayload::CartAbandoned(CartAbandoned {
        cart_id: "cart-4".to_string(),
        user_id: "user-4".to_string(),
        user_email: "shopper@shop.test".to_string(),
        item_count: 2,
        total_value: 59.5,
        abandoned_duration_minutes: minutes,
    }))
    .with_event_id(format!("evt-cart-{}", minutes))
}

pub fn payment_completed(phone: Option<&str>) -> DomainEvent {
    DomainEvent::new(EventPayload::PaymentCompleted(PaymentCompleted {
        order_id: "order-7".to_string(),
        user_id: "user-7".to_string(),
        user_email: "payer@shop.test".to_string(),
        user_phone: phone.map(str::to_string),
        amount: 42.0,
        payment_method: "card".to_string(),
        transaction_id: "txn-77".to_string(),
    }))
    .with_event_id("evt-payment-7")
}

pub fn log_entry(status: NotificationStatus, sent_at: DateTime<Utc>) -> NotificationLog {
    NotificationLog::new(
        "evt-1",
        "OrderCreated",
        NotificationType::Email,
        "buyer@shop.test",
        "order-confirmation",
        status,
    )
    .with_user_id("user-1")
    .with_sent_at(sent_at)
}

pub async fn app_state(log_dir: &Path, production: bool) -> (AppState, Arc<RecordingChannel>) {
    let email = RecordingChannel::new(ChannelKind::Email);
    let sms = RecordingChannel::new(ChannelKind::Sms);
    let logger = Arc::new(NotificationLogger::new(log_dir, 1000));
    let broker = Arc::new(connected_broker().await);

    let state = AppState {
        logger: logger.clone(),
        email: email.clone(),
        sms,
        templates: Arc::new(TemplateCatalog::builtin()),
        limiter: Arc::new(TestSendLimiter::per_minute(3)),
        health: Arc::new(HealthChecker::new(broker, logger)),
        production,
    };

    (state, email)
}
