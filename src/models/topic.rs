use std::fmt::{Display, Formatter, Result};

use tracing::warn;

/// Durable broker topics. Names must match across every service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    UserEvents,
    ProductEvents,
    OrderEvents,
    CartEvents,
    SystemEvents,
    NotificationEvents,
    DeadLetterQueue,
}

impl Topic {
    pub const ALL: [Topic; 7] = [
        Topic::UserEvents,
        Topic::ProductEvents,
        Topic::OrderEvents,
        Topic::CartEvents,
        Topic::SystemEvents,
        Topic::NotificationEvents,
        Topic::DeadLetterQueue,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::UserEvents => "user-events",
            Topic::ProductEvents => "product-events",
            Topic::OrderEvents => "order-events",
            Topic::CartEvents => "cart-events",
            Topic::SystemEvents => "system-events",
            Topic::NotificationEvents => "notification-events",
            Topic::DeadLetterQueue => "dead-letter-queue",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|topic| topic.as_str() == name)
    }
}

impl Display for Topic {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.write_str(self.as_str())
    }
}

// Longer prefixes first so "LowStock" is never shadowed by a shorter match.
const ROUTES: &[(&str, Topic)] = &[
    ("DeadLetter_", Topic::DeadLetterQueue),
    ("Notification", Topic::NotificationEvents),
    ("LowStock", Topic::ProductEvents),
    ("Product", Topic::ProductEvents),
    ("Payment", Topic::OrderEvents),
    ("Service", Topic::SystemEvents),
    ("Stock", Topic::ProductEvents),
    ("Order", Topic::OrderEvents),
    ("User", Topic::UserEvents),
    ("Cart", Topic::CartEvents),
];

/// Maps an event type to its topic by prefix. Never fails: unmatched types land
/// on the system topic.
pub fn route_for(event_type: &str) -> Topic {
    match ROUTES
        .iter()
        .find(|(prefix, _)| event_type.starts_with(prefix))
    {
        Some((_, topic)) => *topic,
        None => {
            warn!(event_type, "No topic route for event type, falling back to system topic");
            Topic::SystemEvents
        }
    }
}
