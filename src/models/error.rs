use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::models::response::ApiResponse;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid or missing environment variable: {0}")]
    Env(#[from] envy::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker connection failed: {0}")]
    Connection(String),

    #[error("broker is not connected")]
    NotConnected,

    #[error("broker rejected message for topic '{topic}': {reason}")]
    Rejected { topic: String, reason: String },

    #[error("broker transaction failed: {0}")]
    Transaction(String),

    #[error("broker consume failed: {0}")]
    Consume(String),
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("publisher is not connected")]
    NotConnected,

    #[error("failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("batch publish to '{topic}' failed: {source}")]
    Batch {
        topic: String,
        #[source]
        source: BrokerError,
    },

    #[error("transaction aborted: {source}")]
    TransactionAborted {
        #[source]
        source: BrokerError,
    },
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template '{name}' not found for channel {channel}")]
    NotFound { name: String, channel: String },

    #[error("unsupported variable type for key '{0}'")]
    UnsupportedVariable(String),

    #[error("missing variable in template: {0}")]
    MissingVariable(String),
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("provider returned status {status}: {body}")]
    Provider { status: u16, body: String },

    #[error(transparent)]
    Template(#[from] TemplateError),
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("failed to build notification data: {0}")]
    Data(#[from] serde_json::Error),

    #[error("{0}")]
    Failed(String),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("redis operation failed: {0}")]
    Redis(#[from] redis::RedisError),
}

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("log file write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("log entry serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors surfaced by the admin HTTP surface, each with a machine-readable code.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Validation { code: &'static str, message: String },

    #[error("{0}")]
    Forbidden(String),

    #[error("rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        ApiError::Validation {
            code,
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation { code, .. } => *code,
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::RateLimited { .. } => "RATE_LIMITED",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()>::error(self.code(), self.to_string());
        (self.status_code(), Json(body)).into_response()
    }
}
