use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{Value as JsonValue, json};
use tracing::{debug, info, warn};

use crate::{
    models::{error::ChannelError, retry::RetryConfig, status::ChannelKind},
    pipeline::templates::TemplateCatalog,
    utils::retry_with_backoff,
};

/// Result of one send attempt. Channels report failures here instead of erroring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendOutcome {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SendOutcome {
    pub fn delivered(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
        }
    }
}

/// Outbound email or SMS provider.
///
/// `send` never fails at the type level: transport and provider errors come
/// back as `SendOutcome { success: false, .. }`.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    async fn send(&self, template: &str, recipient: &str, data: &JsonValue) -> SendOutcome;
}

/// Posts rendered messages to an HTTP provider endpoint.
pub struct HttpChannel {
    kind: ChannelKind,
    http_client: Client,
    endpoint: String,
    templates: Arc<TemplateCatalog>,
    retry_config: RetryConfig,
}

impl HttpChannel {
    pub fn new(
        kind: ChannelKind,
        endpoint: impl Into<String>,
        timeout: Duration,
        templates: Arc<TemplateCatalog>,
        retry_config: RetryConfig,
    ) -> Result<Self, ChannelError> {
        let http_client = Client::builder().timeout(timeout).build()?;
        let endpoint = endpoint.into();

        info!(channel = %kind, endpoint = %endpoint, "HTTP channel initialized");

        Ok(Self {
            kind,
            http_client,
            endpoint,
            templates,
            retry_config,
        })
    }

    async fn try_send(
        &self,
        template: &str,
        recipient: &str,
        data: &JsonValue,
    ) -> Result<(), ChannelError> {
        let content = self.templates.render(self.kind, template, data)?;

        let body = match self.kind {
            ChannelKind::Email => json!({
                "to": recipient,
                "subject": content.subject,
                "body": content.body,
                "template": template,
            }),
            ChannelKind::Sms => json!({
                "to": recipient,
                "body": content.body,
                "template": template,
            }),
        };

        retry_with_backoff(&self.retry_config, || {
            let request = self.http_client.post(&self.endpoint).json(&body);

            async move {
                let response = request.send().await?;
                let status = response.status();

                if status.is_success() {
                    Ok(())
                } else {
                    let body = response.text().await.unwrap_or_default();
                    Err(ChannelError::Provider {
                        status: status.as_u16(),
                        body,
                    })
                }
            }
        })
        .await
    }
}

#[async_trait]
impl NotificationChannel for HttpChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn send(&self, template: &str, recipient: &str, data: &JsonValue) -> SendOutcome {
        debug!(channel = %self.kind, template, recipient, "Sending notification");

        match self.try_send(template, recipient, data).await {
            Ok(()) => SendOutcome::delivered(format!("{} sent to {}", self.kind, recipient)),
            Err(e) => {
                warn!(channel = %self.kind, template, error = %e, "Notification send failed");
                SendOutcome::failed(e.to_string())
            }
        }
    }
}

/// Renders and logs messages instead of delivering them. Used when no
/// provider endpoint is configured for a channel.
pub struct ConsoleChannel {
    kind: ChannelKind,
    templates: Arc<TemplateCatalog>,
}

impl ConsoleChannel {
    pub fn new(kind: ChannelKind, templates: Arc<TemplateCatalog>) -> Self {
        Self { kind, templates }
    }
}

#[async_trait]
impl NotificationChannel for ConsoleChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn send(&self, template: &str, recipient: &str, data: &JsonValue) -> SendOutcome {
        match self.templates.render(self.kind, template, data) {
            Ok(content) => {
                info!(
                    channel = %self.kind,
                    template,
                    recipient,
                    subject = content.subject.as_deref().unwrap_or(""),
                    body = %content.body,
                    "Notification rendered (no provider configured)"
                );
                SendOutcome::delivered(format!("{} logged for {}", self.kind, recipient))
            }
            Err(e) => SendOutcome::failed(e.to_string()),
        }
    }
}
