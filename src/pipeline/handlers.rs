//! Maps domain events to outbound notifications.
//!
//! Each subscribed event goes through the same steps: apply the gate for its
//! type, send through one or both channels, then write one log entry per
//! notification whatever the outcome. Channel failures end up as `failed`
//! entries. A notification that cannot be attempted at all (no recipient)
//! also gets a `failed` entry before the error is returned, and so does an
//! event whose handler panics.

use std::{panic::AssertUnwindSafe, sync::Arc};

use async_trait::async_trait;
use futures_util::FutureExt;
use serde_json::{Value as JsonValue, json};
use tracing::{debug, error, info, warn};

use crate::{
    clients::{
        channel::{NotificationChannel, SendOutcome},
        redis::DeliveryLedger,
    },
    config::Config,
    models::{
        error::HandlerError,
        event::{
            CartAbandoned, DomainEvent, EventKind, EventPayload, LowStockAlert, OrderCancelled,
            OrderCreated, OrderStatus, OrderStatusUpdated, PasswordResetRequested, PaymentCompleted,
            PaymentFailed, StockUpdated, UrgencyLevel, UserRegistered,
        },
        notification::NotificationLog,
        status::{ChannelKind, IdempotencyStatus, NotificationStatus, NotificationType},
        topic::Topic,
    },
    pipeline::{consumer::EventHandler, logger::NotificationLogger, templates},
    utils::panic_message,
};

pub const SIGNIFICANT_STOCK_DELTA: u64 = 100;
pub const CART_ABANDONMENT_MINUTES: u64 = 1440;
pub const NOTIFIED_ORDER_STATUSES: [OrderStatus; 3] = [
    OrderStatus::Preparing,
    OrderStatus::Shipped,
    OrderStatus::Delivered,
];

pub const SUBSCRIBED_KINDS: [EventKind; 10] = [
    EventKind::UserRegistered,
    EventKind::PasswordResetRequested,
    EventKind::OrderCreated,
    EventKind::OrderStatusUpdated,
    EventKind::OrderCancelled,
    EventKind::PaymentCompleted,
    EventKind::PaymentFailed,
    EventKind::LowStockAlert,
    EventKind::StockUpdated,
    EventKind::CartAbandoned,
];

/// Topics carrying events that can produce notifications.
pub const NOTIFICATION_TOPICS: [Topic; 5] = [
    Topic::UserEvents,
    Topic::ProductEvents,
    Topic::OrderEvents,
    Topic::CartEvents,
    Topic::SystemEvents,
];

pub fn is_significant_stock_change(update: &StockUpdated) -> bool {
    update.delta() > SIGNIFICANT_STOCK_DELTA || update.new_quantity == 0
}

pub fn is_notified_status(status: OrderStatus) -> bool {
    NOTIFIED_ORDER_STATUSES.contains(&status)
}

pub fn is_abandoned(cart: &CartAbandoned) -> bool {
    cart.abandoned_duration_minutes >= CART_ABANDONMENT_MINUTES
}

pub fn delivery_key(event_id: &str, template: &str, channel: ChannelKind) -> String {
    format!("{}:{}:{}", event_id, template, channel)
}

fn money(amount: f64) -> String {
    format!("{:.2}", amount)
}

struct Notice {
    template: &'static str,
    notification_type: NotificationType,
    recipient: String,
    phone: Option<String>,
    data: JsonValue,
}

impl Notice {
    fn email(template: &'static str, recipient: impl Into<String>, data: JsonValue) -> Self {
        Self {
            template,
            notification_type: NotificationType::Email,
            recipient: recipient.into(),
            phone: None,
            data,
        }
    }

    fn sms(template: &'static str, phone: impl Into<String>, data: JsonValue) -> Self {
        Self {
            template,
            notification_type: NotificationType::Sms,
            recipient: phone.into(),
            phone: None,
            data,
        }
    }

    fn email_and_sms(
        template: &'static str,
        recipient: impl Into<String>,
        phone: Option<String>,
        data: JsonValue,
    ) -> Self {
        Self {
            template,
            notification_type: NotificationType::EmailSms,
            recipient: recipient.into(),
            phone,
            data,
        }
    }
}

pub struct NotificationHandlers {
    email: Arc<dyn NotificationChannel>,
    sms: Arc<dyn NotificationChannel>,
    logger: Arc<NotificationLogger>,
    ledger: Option<Arc<dyn DeliveryLedger>>,
    admin_email: String,
    admin_phone: Option<String>,
}

impl NotificationHandlers {
    pub fn new(
        email: Arc<dyn NotificationChannel>,
        sms: Arc<dyn NotificationChannel>,
        logger: Arc<NotificationLogger>,
        admin_email: impl Into<String>,
    ) -> Self {
        Self {
            email,
            sms,
            logger,
            ledger: None,
            admin_email: admin_email.into(),
            admin_phone: None,
        }
    }

    pub fn from_config(
        config: &Config,
        email: Arc<dyn NotificationChannel>,
        sms: Arc<dyn NotificationChannel>,
        logger: Arc<NotificationLogger>,
    ) -> Self {
        let handlers = Self::new(email, sms, logger, config.admin_email.clone());
        match &config.admin_phone {
            Some(phone) => handlers.with_admin_phone(phone.clone()),
            None => handlers,
        }
    }

    pub fn with_admin_phone(mut self, phone: impl Into<String>) -> Self {
        self.admin_phone = Some(phone.into());
        self
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn DeliveryLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    async fn on_user_registered(
        &self,
        event: &DomainEvent,
        user: &UserRegistered,
    ) -> Result<(), HandlerError> {
        let data = json!({
            "firstName": user.first_name,
            "lastName": user.last_name,
            "email": user.email,
        });
        self.deliver(event, Notice::email(templates::WELCOME, &user.email, data))
            .await
    }

    async fn on_password_reset(
        &self,
        event: &DomainEvent,
        reset: &PasswordResetRequested,
    ) -> Result<(), HandlerError> {
        let data = json!({
            "resetToken": reset.reset_token,
            "expiresAt": reset.expires_at.to_rfc3339(),
        });
        self.deliver(
            event,
            Notice::email(templates::PASSWORD_RESET, &reset.email, data),
        )
        .await
    }

    async fn on_order_created(
        &self,
        event: &DomainEvent,
        order: &OrderCreated,
    ) -> Result<(), HandlerError> {
        let data = json!({
            "orderId": order.order_id,
            "itemCount": order.item_count,
            "totalAmount": money(order.total_amount),
        });
        self.deliver(
            event,
            Notice::email(templates::ORDER_CONFIRMATION, &order.user_email, data),
        )
        .await
    }

    async fn on_order_status_updated(
        &self,
        event: &DomainEvent,
        update: &OrderStatusUpdated,
    ) -> Result<(), HandlerError> {
        if !is_notified_status(update.new_status) {
            debug!(
                order_id = %update.order_id,
                new_status = update.new_status.as_str(),
                "Order status change does not notify"
            );
            return Ok(());
        }

        let tracking_info = update
            .tracking_number
            .as_deref()
            .map(|number| format!("Tracking number: {}", number))
            .unwrap_or_default();

        let data = json!({
            "orderId": update.order_id,
            "previousStatus": update.previous_status.as_str(),
            "newStatus": update.new_status.as_str(),
            "trackingInfo": tracking_info,
        });
        self.deliver(
            event,
            Notice::email(templates::ORDER_STATUS_UPDATE, &update.user_email, data),
        )
        .await
    }

    async fn on_order_cancelled(
        &self,
        event: &DomainEvent,
        cancelled: &OrderCancelled,
    ) -> Result<(), HandlerError> {
        let data = json!({
            "orderId": cancelled.order_id,
            "reason": cancelled.reason.as_deref().unwrap_or("not specified"),
        });
        self.deliver(
            event,
            Notice::email(templates::ORDER_CANCELLED, &cancelled.user_email, data),
        )
        .await
    }

    async fn on_payment_completed(
        &self,
        event: &DomainEvent,
        payment: &PaymentCompleted,
    ) -> Result<(), HandlerError> {
        let data = json!({
            "orderId": payment.order_id,
            "amount": money(payment.amount),
            "paymentMethod": payment.payment_method,
            "transactionId": payment.transaction_id,
        });
        self.deliver(
            event,
            Notice::email_and_sms(
                templates::PAYMENT_CONFIRMATION,
                &payment.user_email,
                payment.user_phone.clone(),
                data,
            ),
        )
        .await
    }

    async fn on_payment_failed(
        &self,
        event: &DomainEvent,
        payment: &PaymentFailed,
    ) -> Result<(), HandlerError> {
        let data = json!({
            "orderId": payment.order_id,
            "amount": money(payment.amount),
            "reason": payment.reason,
        });
        self.deliver(
            event,
            Notice::email(templates::PAYMENT_FAILED, &payment.user_email, data),
        )
        .await
    }

    async fn on_low_stock(
        &self,
        event: &DomainEvent,
        alert: &LowStockAlert,
    ) -> Result<(), HandlerError> {
        let data = json!({
            "productId": alert.product_id,
            "productName": alert.product_name,
            "currentStock": alert.current_stock,
            "threshold": alert.threshold,
            "urgencyLevel": alert.urgency_level.as_str(),
        });

        let email = self
            .deliver(
                event,
                Notice::email(templates::LOW_STOCK_ALERT, &self.admin_email, data.clone()),
            )
            .await;

        if alert.urgency_level != UrgencyLevel::Critical {
            return email;
        }

        let phone = self.admin_phone.clone().unwrap_or_default();
        let sms = self
            .deliver(event, Notice::sms(templates::LOW_STOCK_ALERT, phone, data))
            .await;

        email.and(sms)
    }

    async fn on_stock_updated(
        &self,
        event: &DomainEvent,
        update: &StockUpdated,
    ) -> Result<(), HandlerError> {
        if !is_significant_stock_change(update) {
            debug!(
                product_id = %update.product_id,
                delta = update.delta(),
                "Stock change below notification threshold"
            );
            return Ok(());
        }

        let data = json!({
            "productId": update.product_id,
            "productName": update.product_name,
            "previousQuantity": update.previous_quantity,
            "newQuantity": update.new_quantity,
        });
        self.deliver(
            event,
            Notice::email(templates::STOCK_UPDATE, &self.admin_email, data),
        )
        .await
    }

    async fn on_cart_abandoned(
        &self,
        event: &DomainEvent,
        cart: &CartAbandoned,
    ) -> Result<(), HandlerError> {
        if !is_abandoned(cart) {
            debug!(
                cart_id = %cart.cart_id,
                minutes = cart.abandoned_duration_minutes,
                "Cart idle time below reminder threshold"
            );
            return Ok(());
        }

        let data = json!({
            "itemCount": cart.item_count,
            "totalValue": money(cart.total_value),
        });
        self.deliver(
            event,
            Notice::email(templates::CART_ABANDONMENT, &cart.user_email, data),
        )
        .await
    }

    /// Sends `notice` and records exactly one log entry for it.
    async fn deliver(&self, event: &DomainEvent, notice: Notice) -> Result<(), HandlerError> {
        let event_id = event.event_id_or_unknown();

        if notice.recipient.trim().is_empty() {
            let error = HandlerError::MissingField("recipient");
            let log = self
                .entry(event, &notice, NotificationStatus::Failed)
                .with_error(error.to_string());
            self.logger.log_notification(log).await;
            return Err(error);
        }

        let mut legs: Vec<(&dyn NotificationChannel, &str)> = Vec::with_capacity(2);
        let mut metadata = serde_json::Map::new();

        match notice.notification_type {
            NotificationType::Sms => legs.push((&*self.sms, notice.recipient.as_str())),
            NotificationType::EmailSms => {
                legs.push((&*self.email, notice.recipient.as_str()));
                match notice.phone.as_deref().filter(|phone| !phone.trim().is_empty()) {
                    Some(phone) => legs.push((&*self.sms, phone)),
                    None => {
                        metadata.insert("smsSkipped".into(), json!("no phone number on record"));
                    }
                }
            }
            NotificationType::Email | NotificationType::Push => {
                legs.push((&*self.email, notice.recipient.as_str()))
            }
        }

        let mut results = Vec::with_capacity(legs.len());
        for (channel, to) in legs {
            if let Some(outcome) = self
                .send_once(event_id, notice.template, channel, to, &notice.data)
                .await
            {
                results.push((channel.kind(), outcome));
            }
        }

        if results.is_empty() {
            info!(
                event_id,
                template = notice.template,
                "Notification already delivered, skipping"
            );
            return Ok(());
        }

        let errors: Vec<String> = results
            .iter()
            .filter(|(_, outcome)| !outcome.success)
            .map(|(kind, outcome)| {
                format!(
                    "{}: {}",
                    kind,
                    outcome.error.as_deref().unwrap_or("send failed")
                )
            })
            .collect();

        metadata.insert(
            "channels".into(),
            JsonValue::Array(
                results
                    .iter()
                    .map(|(kind, outcome)| json!({ "channel": kind.as_str(), "outcome": outcome }))
                    .collect(),
            ),
        );

        let status = if errors.is_empty() {
            NotificationStatus::Sent
        } else {
            NotificationStatus::Failed
        };

        let mut log = self
            .entry(event, &notice, status)
            .with_metadata(JsonValue::Object(metadata));
        if !errors.is_empty() {
            let error = errors.join("; ");
            warn!(event_id, template = notice.template, error = %error, "Notification failed");
            log = log.with_error(error);
        }

        self.logger.log_notification(log).await;
        Ok(())
    }

    /// Sends through `channel` unless the ledger already marks this delivery as sent.
    /// Returns `None` for a suppressed duplicate.
    async fn send_once(
        &self,
        event_id: &str,
        template: &str,
        channel: &dyn NotificationChannel,
        to: &str,
        data: &JsonValue,
    ) -> Option<SendOutcome> {
        let key = delivery_key(event_id, template, channel.kind());

        if let Some(ledger) = &self.ledger {
            match ledger.check(&key).await {
                Ok(IdempotencyStatus::Sent) => return None,
                Ok(_) => {}
                Err(e) => warn!(key = %key, error = %e, "Delivery ledger unavailable, sending anyway"),
            }
            if let Err(e) = ledger.mark_processing(&key).await {
                warn!(key = %key, error = %e, "Failed to mark delivery as processing");
            }
        }

        let outcome = AssertUnwindSafe(channel.send(template, to, data))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| SendOutcome::failed("channel panicked during send"));

        if let Some(ledger) = &self.ledger {
            let marked = if outcome.success {
                ledger.mark_sent(&key).await
            } else {
                ledger.mark_failed(&key).await
            };
            if let Err(e) = marked {
                warn!(key = %key, error = %e, "Failed to record delivery outcome");
            }
        }

        Some(outcome)
    }

    /// The notification an event would have produced, used to record a handler panic.
    fn intended_notice(&self, event: &DomainEvent) -> Notice {
        let none = JsonValue::Null;
        match &event.payload {
            EventPayload::UserRegistered(p) => Notice::email(templates::WELCOME, &p.email, none),
            EventPayload::PasswordResetRequested(p) => {
                Notice::email(templates::PASSWORD_RESET, &p.email, none)
            }
            EventPayload::OrderCreated(p) => {
                Notice::email(templates::ORDER_CONFIRMATION, &p.user_email, none)
            }
            EventPayload::OrderStatusUpdated(p) => {
                Notice::email(templates::ORDER_STATUS_UPDATE, &p.user_email, none)
            }
            EventPayload::OrderCancelled(p) => {
                Notice::email(templates::ORDER_CANCELLED, &p.user_email, none)
            }
            EventPayload::PaymentCompleted(p) => Notice::email_and_sms(
                templates::PAYMENT_CONFIRMATION,
                &p.user_email,
                p.user_phone.clone(),
                none,
            ),
            EventPayload::PaymentFailed(p) => {
                Notice::email(templates::PAYMENT_FAILED, &p.user_email, none)
            }
            EventPayload::LowStockAlert(_) => {
                Notice::email(templates::LOW_STOCK_ALERT, &self.admin_email, none)
            }
            EventPayload::StockUpdated(_) => {
                Notice::email(templates::STOCK_UPDATE, &self.admin_email, none)
            }
            EventPayload::CartAbandoned(p) => {
                Notice::email(templates::CART_ABANDONMENT, &p.user_email, none)
            }
            EventPayload::UserProfileUpdated(_)
            | EventPayload::ProductCreated(_)
            | EventPayload::ProductUpdated(_)
            | EventPayload::CartItemAdded(_)
            | EventPayload::ServiceStarted(_)
            | EventPayload::ServiceStopped(_) => Notice::email("none", "", none),
        }
    }

    async fn dispatch(&self, event: &DomainEvent) -> Result<(), HandlerError> {
        match &event.payload {
            EventPayload::UserRegistered(p) => self.on_user_registered(event, p).await,
            EventPayload::PasswordResetRequested(p) => self.on_password_reset(event, p).await,
            EventPayload::OrderCreated(p) => self.on_order_created(event, p).await,
            EventPayload::OrderStatusUpdated(p) => self.on_order_status_updated(event, p).await,
            EventPayload::OrderCancelled(p) => self.on_order_cancelled(event, p).await,
            EventPayload::PaymentCompleted(p) => self.on_payment_completed(event, p).await,
            EventPayload::PaymentFailed(p) => self.on_payment_failed(event, p).await,
            EventPayload::LowStockAlert(p) => self.on_low_stock(event, p).await,
            EventPayload::StockUpdated(p) => self.on_stock_updated(event, p).await,
            EventPayload::CartAbandoned(p) => self.on_cart_abandoned(event, p).await,
            EventPayload::UserProfileUpdated(_)
            | EventPayload::ProductCreated(_)
            | EventPayload::ProductUpdated(_)
            | EventPayload::CartItemAdded(_)
            | EventPayload::ServiceStarted(_)
            | EventPayload::ServiceStopped(_) => {
                debug!(event_type = event.event_type(), "Event carries no notification");
                Ok(())
            }
        }
    }

    fn entry(
        &self,
        event: &DomainEvent,
        notice: &Notice,
        status: NotificationStatus,
    ) -> NotificationLog {
        let log = NotificationLog::new(
            event.event_id_or_unknown(),
            event.event_type(),
            notice.notification_type,
            notice.recipient.clone(),
            notice.template,
            status,
        );
        correlate(log, &event.payload)
    }
}

/// Copies the aggregate ids carried by `payload` onto `log`.
fn correlate(log: NotificationLog, payload: &EventPayload) -> NotificationLog {
    match payload {
        EventPayload::UserRegistered(p) => log.with_user_id(&p.user_id),
        EventPayload::UserProfileUpdated(p) => log.with_user_id(&p.user_id),
        EventPayload::PasswordResetRequested(p) => log.with_user_id(&p.user_id),
        EventPayload::ProductCreated(p) => log.with_product_id(&p.product_id),
        EventPayload::ProductUpdated(p) => log.with_product_id(&p.product_id),
        EventPayload::StockUpdated(p) => log.with_product_id(&p.product_id),
        EventPayload::LowStockAlert(p) => log.with_product_id(&p.product_id),
        EventPayload::OrderCreated(p) => log.with_user_id(&p.user_id).with_order_id(&p.order_id),
        EventPayload::OrderStatusUpdated(p) => {
            log.with_user_id(&p.user_id).with_order_id(&p.order_id)
        }
        EventPayload::OrderCancelled(p) => log.with_user_id(&p.user_id).with_order_id(&p.order_id),
        EventPayload::PaymentCompleted(p) => {
            log.with_user_id(&p.user_id).with_order_id(&p.order_id)
        }
        EventPayload::PaymentFailed(p) => log.with_user_id(&p.user_id).with_order_id(&p.order_id),
        EventPayload::CartItemAdded(p) => log
            .with_user_id(&p.user_id)
            .with_cart_id(&p.cart_id)
            .with_product_id(&p.product_id),
        EventPayload::CartAbandoned(p) => log.with_user_id(&p.user_id).with_cart_id(&p.cart_id),
        EventPayload::ServiceStarted(_) | EventPayload::ServiceStopped(_) => log,
    }
}

#[async_trait]
impl EventHandler for NotificationHandlers {
    fn name(&self) -> &str {
        "notification-handlers"
    }

    async fn handle(&self, event: &DomainEvent) -> Result<(), HandlerError> {
        match AssertUnwindSafe(self.dispatch(event)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let error = HandlerError::Panicked(panic_message(panic.as_ref()));
                error!(
                    event_id = event.event_id_or_unknown(),
                    event_type = event.event_type(),
                    error = %error,
                    "Notification handler panicked"
                );

                let notice = self.intended_notice(event);
                let log = self
                    .entry(event, &notice, NotificationStatus::Failed)
                    .with_error(error.to_string());
                self.logger.log_notification(log).await;

                Err(error)
            }
        }
    }
}
