use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// JSON error envelope shared by every route: `{ "kind", "error", "details"? }`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

pub fn error_response(
    status: StatusCode,
    kind: &'static str,
    error: String,
    details: Option<String>,
    retry_after: Option<u64>,
) -> Response {
    let body = ErrorBody {
        kind,
        error,
        details,
    };
    let mut response = (status, Json(body)).into_response();
    if let Some(seconds) = retry_after {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, seconds.into());
    }
    response
}

/// Failures outside the domain layer: startup, configuration and the
/// shared middleware.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Too many requests: {0}")]
    TooManyRequests(String, Option<u64>),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::TooManyRequests(..) => "rate_limited",
            AppError::ConfigError(_) | AppError::DatabaseError(_) | AppError::InternalError(_) => {
                "internal"
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::TooManyRequests(..) => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.into())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(err.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();
        match self {
            AppError::TooManyRequests(message, retry_after) => {
                error_response(status, kind, message, None, retry_after)
            }
            other => {
                // Infrastructure detail stays in the logs.
                tracing::error!(error = %other, kind, "Request failed");
                error_response(status, kind, "Internal server error".to_string(), None, None)
            }
        }
    }
}
