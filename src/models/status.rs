use std::{
    fmt::{Display, Formatter, Result},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
    Retry,
}

impl NotificationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, NotificationStatus::Sent | NotificationStatus::Failed)
    }
}

impl Display for NotificationStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            NotificationStatus::Pending => write!(f, "pending"),
            NotificationStatus::Sent => write!(f, "sent"),
            NotificationStatus::Failed => write!(f, "failed"),
            NotificationStatus::Retry => write!(f, "retry"),
        }
    }
}

impl FromStr for NotificationStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(NotificationStatus::Pending),
            "sent" => Ok(NotificationStatus::Sent),
            "failed" => Ok(NotificationStatus::Failed),
            "retry" => Ok(NotificationStatus::Retry),
            other => Err(format!("unknown notification status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Email,
    Sms,
    EmailSms,
    Push,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Email => "email",
            NotificationType::Sms => "sms",
            NotificationType::EmailSms => "email_sms",
            NotificationType::Push => "push",
        }
    }
}

impl Display for NotificationType {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "email" => Ok(NotificationType::Email),
            "sms" => Ok(NotificationType::Sms),
            "email_sms" => Ok(NotificationType::EmailSms),
            "push" => Ok(NotificationType::Push),
            other => Err(format!("unknown notification type '{}'", other)),
        }
    }
}

/// Outbound channels the pipeline can actually send through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Email,
    Sms,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Email => "email",
            ChannelKind::Sms => "sms",
        }
    }

    pub fn notification_type(&self) -> NotificationType {
        match self {
            ChannelKind::Email => NotificationType::Email,
            ChannelKind::Sms => NotificationType::Sms,
        }
    }
}

impl Display for ChannelKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "email" => Ok(ChannelKind::Email),
            "sms" => Ok(ChannelKind::Sms),
            other => Err(format!("unknown channel '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IdempotencyStatus {
    NotFound,
    Processing,
    Sent,
    Failed,
}
