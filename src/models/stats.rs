use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::notification::NotificationLog;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub sent: u64,
    pub failed: u64,
}

/// Aggregate view over a set of logs. Always recomputed, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationStats {
    pub date: NaiveDate,
    pub total_sent: u64,
    pub total_failed: u64,
    pub success_rate: f64,
    pub by_type: BTreeMap<String, OutcomeCounts>,
    pub by_template: BTreeMap<String, OutcomeCounts>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowSnapshot {
    pub sent: u64,
    pub failed: u64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealTimeStats {
    pub last24_hours: NotificationStats,
    pub last_hour: WindowSnapshot,
    pub recent_failures: Vec<NotificationLog>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogSummary {
    pub total_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub retry_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFrequency {
    pub event_type: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorFrequency {
    pub error: String,
    pub count: u64,
}
