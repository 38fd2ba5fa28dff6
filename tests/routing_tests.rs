use anyhow::Result;
use chrono::{TimeZone, Utc};
use notification_pipeline::models::{
    event::{DomainEvent, EventKind, EventPayload, LowStockAlert, UrgencyLevel},
    topic::{Topic, route_for},
};

/// Test: Event types are routed by prefix
#[tokio::test]
async fn test_prefix_routing() -> Result<()> {
    let cases = [
        ("UserRegistered", Topic::UserEvents),
        ("PasswordResetRequested", Topic::SystemEvents),
        ("ProductCreated", Topic::ProductEvents),
        ("StockUpdated", Topic::ProductEvents),
        ("LowStockAlert", Topic::ProductEvents),
        ("OrderCreated", Topic::OrderEvents),
        ("PaymentCompleted", Topic::OrderEvents),
        ("PaymentFailed", Topic::OrderEvents),
        ("CartAbandoned", Topic::CartEvents),
        ("NotificationSent", Topic::NotificationEvents),
        ("ServiceStarted", Topic::SystemEvents),
        ("DeadLetter_OrderCreated", Topic::DeadLetterQueue),
    ];

    for (event_type, expected) in cases {
        assert_eq!(route_for(event_type), expected, "routing {}", event_type);
    }

    Ok(())
}

/// Test: Unknown event types fall back to the system topic
#[tokio::test]
async fn test_unknown_type_routes_to_system() -> Result<()> {
    assert_eq!(route_for("InventoryReconciled"), Topic::SystemEvents);
    assert_eq!(route_for(""), Topic::SystemEvents);

    Ok(())
}

/// Test: Every known event kind has a deterministic topic
#[tokio::test]
async fn test_every_kind_routes() -> Result<()> {
    for kind in EventKind::ALL {
        let topic = route_for(kind.as_str());
        assert_ne!(topic, Topic::DeadLetterQueue, "{} must not dead-letter", kind);
        assert_eq!(route_for(kind.as_str()), topic);
    }

    Ok(())
}

/// Test: Topic names are stable and parse back
#[tokio::test]
async fn test_topic_names() -> Result<()> {
    let names: Vec<_> = Topic::ALL.iter().map(Topic::as_str).collect();
    assert_eq!(
        names,
        vec![
            "user-events",
            "product-events",
            "order-events",
            "cart-events",
            "system-events",
            "notification-events",
            "dead-letter-queue",
        ]
    );

    for topic in Topic::ALL {
        assert_eq!(Topic::from_name(topic.as_str()), Some(topic));
    }
    assert_eq!(Topic::from_name("audit-events"), None);

    Ok(())
}

/// Test: Events serialize with eventType and a camelCase payload
#[tokio::test]
async fn test_event_wire_shape() -> Result<()> {
    let event = DomainEvent::new(EventPayload::LowStockAlert(LowStockAlert {
        product_id: "prod-2".to_string(),
        product_name: "Oat Milk".to_string(),
        current_stock: 3,
        threshold: 10,
        urgency_level: UrgencyLevel::Critical,
    }))
    .with_event_id("evt-1")
    .with_timestamp(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());

    let wire = serde_json::to_value(&event)?;

    assert_eq!(wire["eventType"], "LowStockAlert");
    assert_eq!(wire["eventId"], "evt-1");
    assert_eq!(wire["aggregateId"], "prod-2");
    assert_eq!(wire["version"], "1.0");
    assert_eq!(wire["payload"]["currentStock"], 3);
    assert_eq!(wire["payload"]["urgencyLevel"], "critical");
    assert!(wire.get("correlationId").is_none());

    let decoded: DomainEvent = serde_json::from_value(wire)?;
    assert_eq!(decoded, event);

    Ok(())
}

/// Test: Events from producers that omit optional fields still decode
#[tokio::test]
async fn test_minimal_event_decodes() -> Result<()> {
    let raw = serde_json::json!({
        "eventType": "UserRegistered",
        "aggregateId": "user-1",
        "payload": {
            "userId": "user-1",
            "email": "ada@shop.test",
            "firstName": "Ada"
        }
    });

    let event: DomainEvent = serde_json::from_value(raw)?;

    assert_eq!(event.kind(), EventKind::UserRegistered);
    assert_eq!(event.version, "1.0");
    assert!(event.event_id.is_none());
    assert!(!event.is_enriched());

    Ok(())
}
