use std::collections::HashMap;

use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::models::{
    error::TemplateError,
    status::ChannelKind,
    template::{Template, TemplateContent},
};

pub const WELCOME: &str = "welcome";
pub const PASSWORD_RESET: &str = "password-reset";
pub const ORDER_CONFIRMATION: &str = "order-confirmation";
pub const ORDER_STATUS_UPDATE: &str = "order-status-update";
pub const ORDER_CANCELLED: &str = "order-cancelled";
pub const PAYMENT_CONFIRMATION: &str = "payment-confirmation";
pub const PAYMENT_FAILED: &str = "payment-failed";
pub const LOW_STOCK_ALERT: &str = "low-stock-alert";
pub const STOCK_UPDATE: &str = "stock-update";
pub const CART_ABANDONMENT: &str = "cart-abandonment";

/// Message templates keyed by channel and name, rendered with `{{variable}}` substitution.
#[derive(Debug, Clone)]
pub struct TemplateCatalog {
    templates: HashMap<(ChannelKind, String), Template>,
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl TemplateCatalog {
    pub fn empty() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    pub fn builtin() -> Self {
        let email = |name: &str, subject: &str, body: &str| Template {
            name: name.to_string(),
            channel: ChannelKind::Email,
            subject: Some(subject.to_string()),
            body: body.to_string(),
        };
        let sms = |name: &str, body: &str| Template {
            name: name.to_string(),
            channel: ChannelKind::Sms,
            subject: None,
            body: body.to_string(),
        };

        [
            email(
                WELCOME,
                "Welcome to the store, {{firstName}}!",
                "Hi {{firstName}}, your account is ready. Sign in with {{email}} to start shopping.",
            ),
            email(
                PASSWORD_RESET,
                "Reset your password",
                "Use this code to reset your password: {{resetToken}}. It expires at {{expiresAt}}.",
            ),
            email(
                ORDER_CONFIRMATION,
                "Order {{orderId}} received",
                "Thanks for your order of {{itemCount}} item(s). Total: {{totalAmount}}.",
            ),
            email(
                ORDER_STATUS_UPDATE,
                "Order {{orderId}} is {{newStatus}}",
                "Your order moved from {{previousStatus}} to {{newStatus}}. {{trackingInfo}}",
            ),
            email(
                ORDER_CANCELLED,
                "Order {{orderId}} cancelled",
                "Your order was cancelled. Reason: {{reason}}.",
            ),
            email(
                PAYMENT_CONFIRMATION,
                "Payment received for order {{orderId}}",
                "We received {{amount}} via {{paymentMethod}}. Transaction: {{transactionId}}.",
            ),
            email(
                PAYMENT_FAILED,
                "Payment failed for order {{orderId}}",
                "We could not process your payment of {{amount}}: {{reason}}.",
            ),
            email(
                LOW_STOCK_ALERT,
                "[{{urgencyLevel}}] Low stock: {{productName}}",
                "{{productName}} ({{productId}}) is down to {{currentStock}} units, threshold {{threshold}}.",
            ),
            email(
                STOCK_UPDATE,
                "Stock changed: {{productName}}",
                "{{productName}} ({{productId}}) went from {{previousQuantity}} to {{newQuantity}} units.",
            ),
            email(
                CART_ABANDONMENT,
                "You left {{itemCount}} item(s) in your cart",
                "Your cart worth {{totalValue}} is still waiting for you.",
            ),
            sms(
                LOW_STOCK_ALERT,
                "CRITICAL: {{productName}} is down to {{currentStock}} units.",
            ),
            sms(
                PAYMENT_CONFIRMATION,
                "Payment of {{amount}} for order {{orderId}} received. Thank you!",
            ),
        ]
        .into_iter()
        .fold(Self::empty(), |catalog, template| catalog.with_template(template))
    }

    pub fn with_template(mut self, template: Template) -> Self {
        self.templates
            .insert((template.channel, template.name.clone()), template);
        self
    }

    pub fn get(&self, channel: ChannelKind, name: &str) -> Option<&Template> {
        self.templates.get(&(channel, name.to_string()))
    }

    pub fn contains(&self, channel: ChannelKind, name: &str) -> bool {
        self.get(channel, name).is_some()
    }

    pub fn names(&self, channel: ChannelKind) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .templates
            .values()
            .filter(|template| template.channel == channel)
            .map(|template| template.name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    pub fn render(
        &self,
        channel: ChannelKind,
        name: &str,
        data: &JsonValue,
    ) -> Result<TemplateContent, TemplateError> {
        let template = self
            .get(channel, name)
            .ok_or_else(|| TemplateError::NotFound {
                name: name.to_string(),
                channel: channel.to_string(),
            })?;

        debug!(
            template = %template.name,
            channel = %channel,
            "Rendering template"
        );

        let subject = template
            .subject
            .as_deref()
            .map(|subject| Self::replace_variables(subject, data))
            .transpose()?;
        let body = Self::replace_variables(&template.body, data)?;

        Ok(TemplateContent { subject, body })
    }

    /// Substitutes `{{key}}` placeholders in one pass. Substituted values are
    /// never rescanned, so data containing braces is inserted verbatim.
    fn replace_variables(template: &str, data: &JsonValue) -> Result<String, TemplateError> {
        let mut result = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("{{") {
            let Some(len) = rest[start + 2..].find("}}") else {
                break;
            };

            result.push_str(&rest[..start]);
            let key = &rest[start + 2..start + 2 + len];

            match data.get(key) {
                Some(JsonValue::String(s)) => result.push_str(s),
                Some(JsonValue::Number(n)) => result.push_str(&n.to_string()),
                Some(JsonValue::Bool(b)) => result.push_str(&b.to_string()),
                Some(JsonValue::Null) => {}
                Some(_) => return Err(TemplateError::UnsupportedVariable(key.to_string())),
                None => {
                    let missing_var = format!("{{{{{}}}}}", key);
                    warn!(
                        missing_variable = %missing_var,
                        "Template contains unreplaced variable"
                    );
                    return Err(TemplateError::MissingVariable(missing_var));
                }
            }

            rest = &rest[start + 2 + len + 2..];
        }

        result.push_str(rest);
        Ok(result)
    }
}
