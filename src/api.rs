use std::{future::Future, sync::Arc};

use axum::{
    Router,
    extract::{Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::{
    clients::{
        channel::{NotificationChannel, SendOutcome},
        health::HealthChecker,
    },
    models::{
        error::ApiError,
        health::HealthStatus,
        notification::{LogFilter, NotificationLog},
        response::{ApiResponse, Pagination},
        stats::{
            ErrorFrequency, EventFrequency, LogSummary, NotificationStats, RealTimeStats,
        },
        status::{ChannelKind, NotificationStatus, NotificationType},
    },
    pipeline::{
        logger::NotificationLogger,
        rate_limit::{RateDecision, TestSendLimiter},
        templates::TemplateCatalog,
    },
};

pub const DEFAULT_PAGE_LIMIT: u64 = 50;
pub const MAX_PAGE_LIMIT: u64 = 200;
pub const MAX_STATS_RANGE_DAYS: i64 = 30;
pub const TOP_FREQUENCIES: usize = 5;
pub const TEST_EVENT_TYPE: &str = "TestNotification";

#[derive(Clone)]
pub struct AppState {
    pub logger: Arc<NotificationLogger>,
    pub email: Arc<dyn NotificationChannel>,
    pub sms: Arc<dyn NotificationChannel>,
    pub templates: Arc<TemplateCatalog>,
    pub limiter: Arc<TestSendLimiter>,
    pub health: Arc<HealthChecker>,
    pub production: bool,
}

impl AppState {
    fn channel(&self, kind: ChannelKind) -> &dyn NotificationChannel {
        match kind {
            ChannelKind::Email => &*self.email,
            ChannelKind::Sms => &*self.sms,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/logs", get(list_logs).delete(clear_logs))
        .route("/stats", get(get_stats))
        .route("/test", post(test_send))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_api_server(
    port: u16,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let app = router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "Admin API server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub event_type: Option<String>,
    pub notification_type: Option<String>,
    pub status: Option<String>,
    pub user_id: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsPage {
    pub logs: Vec<NotificationLog>,
    pub pagination: Pagination,
    pub filters: LogFilter,
    pub summary: LogSummary,
}

fn parse_positive(value: Option<&str>, name: &str, default: u64) -> Result<u64, ApiError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<u64>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| {
                ApiError::validation(
                    "VALIDATION_ERROR",
                    format!("{} must be a positive integer", name),
                )
            }),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Accepts RFC 3339 timestamps or plain `YYYY-MM-DD` dates. A plain date
/// bounds the start or the end of that day.
fn parse_instant(raw: &str, name: &str, end_of_day: bool) -> Result<DateTime<Utc>, ApiError> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Ok(instant.with_timezone(&Utc));
    }

    let date = parse_date(raw, name)?;
    let time = if end_of_day {
        NaiveTime::from_hms_milli_opt(23, 59, 59, 999)
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)
    };

    time.map(|time| date.and_time(time).and_utc())
        .ok_or_else(|| ApiError::Internal("invalid time of day".to_string()))
}

fn parse_date(raw: &str, name: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| DateTime::parse_from_rfc3339(raw).map(|instant| instant.date_naive()))
        .map_err(|_| {
            ApiError::validation(
                "VALIDATION_ERROR",
                format!("{} must be a YYYY-MM-DD date or an RFC 3339 timestamp", name),
            )
        })
}

impl LogsQuery {
    fn to_filter(&self) -> Result<LogFilter, ApiError> {
        let notification_type = non_empty(self.notification_type.clone())
            .map(|raw| raw.parse::<NotificationType>())
            .transpose()
            .map_err(|e| ApiError::validation("VALIDATION_ERROR", e))?;

        let status = non_empty(self.status.clone())
            .map(|raw| raw.parse::<NotificationStatus>())
            .transpose()
            .map_err(|e| ApiError::validation("VALIDATION_ERROR", e))?;

        let start_date = non_empty(self.start_date.clone())
            .map(|raw| parse_instant(&raw, "startDate", false))
            .transpose()?;
        let end_date = non_empty(self.end_date.clone())
            .map(|raw| parse_instant(&raw, "endDate", true))
            .transpose()?;

        if let (Some(start), Some(end)) = (start_date, end_date) {
            if end < start {
                return Err(ApiError::validation(
                    "INVALID_DATE_RANGE",
                    "endDate must not be before startDate",
                ));
            }
        }

        Ok(LogFilter {
            event_type: non_empty(self.event_type.clone()),
            notification_type,
            status,
            user_id: non_empty(self.user_id.clone()),
            start_date,
            end_date,
        })
    }
}

async fn list_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<ApiResponse<LogsPage>>, ApiError> {
    let page = parse_positive(query.page.as_deref(), "page", 1)?;
    let limit = parse_positive(query.limit.as_deref(), "limit", DEFAULT_PAGE_LIMIT)?
        .min(MAX_PAGE_LIMIT);
    let filter = query.to_filter()?;

    let matching = state.logger.get_filtered_logs(&filter, None);
    let summary = NotificationLogger::summarize(&matching);
    let pagination = Pagination::new(page, limit, matching.len() as u64);

    let logs = matching
        .into_iter()
        .skip(pagination.offset())
        .take(limit as usize)
        .collect();

    Ok(Json(ApiResponse::success(LogsPage {
        logs,
        pagination,
        filters: filter,
        summary,
    })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsQuery {
    pub period: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum StatsView {
    RealTime(Box<RealTimeStats>),
    Day(NotificationStats),
    Range(Vec<NotificationStats>),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalInfo {
    pub total_logs_in_memory: usize,
    pub error_rate: f64,
    pub most_frequent_events: Vec<EventFrequency>,
    pub most_frequent_errors: Vec<ErrorFrequency>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub period: String,
    pub stats: StatsView,
    pub additional_info: AdditionalInfo,
}

/// Inclusive day range for `period=range`, at most thirty days apart.
pub fn validate_range(start: NaiveDate, end: NaiveDate) -> Result<(), ApiError> {
    if end < start {
        return Err(ApiError::validation(
            "INVALID_DATE_RANGE",
            "endDate must not be before startDate",
        ));
    }

    let span = (end - start).num_days();
    if span > MAX_STATS_RANGE_DAYS {
        return Err(ApiError::validation(
            "INVALID_PERIOD",
            format!(
                "Date range spans {} days, the maximum is {}",
                span, MAX_STATS_RANGE_DAYS
            ),
        ));
    }

    Ok(())
}

async fn get_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<ApiResponse<StatsResponse>>, ApiError> {
    let period = non_empty(query.period).unwrap_or_else(|| "realtime".to_string());
    let start = non_empty(query.start_date)
        .map(|raw| parse_date(&raw, "startDate"))
        .transpose()?;
    let end = non_empty(query.end_date)
        .map(|raw| parse_date(&raw, "endDate"))
        .transpose()?;

    let stats = match period.as_str() {
        "realtime" => StatsView::RealTime(Box::new(state.logger.get_real_time_stats())),
        "day" => {
            let date = start.unwrap_or_else(|| Utc::now().date_naive());
            StatsView::Day(state.logger.generate_daily_stats(date))
        }
        "range" => {
            let (Some(start), Some(end)) = (start, end) else {
                return Err(ApiError::validation(
                    "VALIDATION_ERROR",
                    "startDate and endDate are required for period=range",
                ));
            };
            validate_range(start, end)?;
            StatsView::Range(state.logger.generate_period_stats(start, end))
        }
        other => {
            return Err(ApiError::validation(
                "INVALID_PERIOD",
                format!("Unknown period '{}', expected realtime, day or range", other),
            ));
        }
    };

    let health = state.logger.get_health_status();

    Ok(Json(ApiResponse::success(StatsResponse {
        period,
        stats,
        additional_info: AdditionalInfo {
            total_logs_in_memory: health.total_logs_in_memory,
            error_rate: health.error_rate,
            most_frequent_events: state.logger.most_frequent_events(TOP_FREQUENCIES),
            most_frequent_errors: state.logger.most_frequent_errors(TOP_FREQUENCIES),
        },
    })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSendRequest {
    #[serde(rename = "type")]
    pub channel: Option<String>,
    pub recipient: Option<String>,
    pub template: Option<String>,
    pub test_data: Option<JsonValue>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSendResponse {
    pub result: SendOutcome,
    pub log: NotificationLog,
}

async fn test_send(
    State(state): State<AppState>,
    payload: Result<Json<TestSendRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<TestSendResponse>>, ApiError> {
    let Json(request) =
        payload.map_err(|e| ApiError::validation("VALIDATION_ERROR", e.body_text()))?;

    let (Some(channel), Some(recipient), Some(template)) = (
        non_empty(request.channel),
        non_empty(request.recipient),
        non_empty(request.template),
    ) else {
        return Err(ApiError::validation(
            "MISSING_FIELDS",
            "type, recipient and template are required",
        ));
    };

    let kind: ChannelKind = channel.parse().map_err(|_| {
        ApiError::validation("INVALID_TYPE", "type must be either 'email' or 'sms'")
    })?;

    if !state.templates.contains(kind, &template) {
        return Err(ApiError::validation(
            "INVALID_TEMPLATE",
            format!(
                "Unknown {} template '{}'. Available: {}",
                kind,
                template,
                state.templates.names(kind).join(", ")
            ),
        ));
    }

    if let RateDecision::Denied { retry_after_secs } = state.limiter.check(&recipient) {
        return Err(ApiError::RateLimited { retry_after_secs });
    }

    let test_data = request.test_data.unwrap_or_else(|| json!({}));
    let result = state
        .channel(kind)
        .send(&template, &recipient, &test_data)
        .await;

    let status = if result.success {
        NotificationStatus::Sent
    } else {
        NotificationStatus::Failed
    };

    let mut log = NotificationLog::new(
        format!("test-{}", Uuid::new_v4()),
        TEST_EVENT_TYPE,
        kind.notification_type(),
        recipient,
        template,
        status,
    )
    .with_metadata(json!({ "testMode": true, "testData": test_data }));
    if let Some(error) = &result.error {
        log = log.with_error(error.clone());
    }

    state.logger.log_notification(log.clone()).await;

    Ok(Json(ApiResponse::success(TestSendResponse { result, log })))
}

async fn clear_logs(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    if state.production {
        return Err(ApiError::Forbidden(
            "Clearing logs is disabled in production".to_string(),
        ));
    }

    let cleared = state.logger.clear_memory();
    info!(cleared, "In-memory notification logs cleared");

    Ok(Json(ApiResponse::success(json!({ "cleared": cleared }))))
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let health = state.health.check_all().await;

    let status_code = match health.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}
