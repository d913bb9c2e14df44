use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use service_core::error::error_response;
use thiserror::Error;

use crate::models::ReviewStatus;

/// Every recoverable failure of the governance core.
///
/// Each variant maps to a stable `kind` string so clients can branch on it
/// without parsing messages.
#[derive(Error, Debug)]
pub enum GovernanceError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Identity already exists: {0}")]
    DuplicateIdentity(String),

    #[error("Account locked until {until}")]
    AccountLocked { until: DateTime<Utc> },

    #[error("Not permitted on your own account: {0}")]
    SelfActionForbidden(String),

    #[error("At least {required} SUPER_ADMIN users must remain (currently {current})")]
    QuorumViolation { current: i64, required: i64 },

    #[error("Request is not pending (status: {status})")]
    RequestNotPending { status: ReviewStatus },

    #[error("No provisioning rule for domain '{domain}' (provider '{provider}')")]
    NoProvisioningRule { provider: String, domain: String },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account is not active")]
    AccountInactive,

    #[error("{0} not found")]
    NotFound(String),

    #[error("Too many attempts, retry in {retry_after}s")]
    RateLimited { retry_after: u64 },

    #[error("Store error: {0}")]
    Store(anyhow::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl GovernanceError {
    pub fn kind(&self) -> &'static str {
        match self {
            GovernanceError::Unauthorized => "unauthorized",
            GovernanceError::Forbidden(_) => "forbidden",
            GovernanceError::DuplicateIdentity(_) => "duplicate_identity",
            GovernanceError::AccountLocked { .. } => "account_locked",
            GovernanceError::SelfActionForbidden(_) => "self_action_forbidden",
            GovernanceError::QuorumViolation { .. } => "quorum_violation",
            GovernanceError::RequestNotPending { .. } => "request_not_pending",
            GovernanceError::NoProvisioningRule { .. } => "no_provisioning_rule",
            GovernanceError::ValidationFailed(_) => "validation_failed",
            GovernanceError::InvalidCredentials => "invalid_credentials",
            GovernanceError::AccountInactive => "account_inactive",
            GovernanceError::NotFound(_) => "not_found",
            GovernanceError::RateLimited { .. } => "rate_limited",
            GovernanceError::Store(_) | GovernanceError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GovernanceError::Unauthorized | GovernanceError::InvalidCredentials => {
                StatusCode::UNAUTHORIZED
            }
            GovernanceError::Forbidden(_)
            | GovernanceError::SelfActionForbidden(_)
            | GovernanceError::NoProvisioningRule { .. }
            | GovernanceError::AccountInactive => StatusCode::FORBIDDEN,
            GovernanceError::DuplicateIdentity(_)
            | GovernanceError::QuorumViolation { .. }
            | GovernanceError::RequestNotPending { .. } => StatusCode::CONFLICT,
            GovernanceError::AccountLocked { .. } => StatusCode::LOCKED,
            GovernanceError::ValidationFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            GovernanceError::NotFound(_) => StatusCode::NOT_FOUND,
            GovernanceError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GovernanceError::Store(_) | GovernanceError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn not_found(what: &str) -> Self {
        GovernanceError::NotFound(what.to_string())
    }

    pub fn store(err: impl Into<anyhow::Error>) -> Self {
        GovernanceError::Store(err.into())
    }
}

impl From<sqlx::Error> for GovernanceError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                let constraint = db_err.constraint().unwrap_or("unique key").to_string();
                return GovernanceError::DuplicateIdentity(constraint);
            }
        }
        GovernanceError::Store(anyhow::Error::new(err))
    }
}

impl From<validator::ValidationErrors> for GovernanceError {
    fn from(err: validator::ValidationErrors) -> Self {
        GovernanceError::ValidationFailed(err.to_string())
    }
}

impl From<crate::models::UnknownPermission> for GovernanceError {
    fn from(err: crate::models::UnknownPermission) -> Self {
        GovernanceError::ValidationFailed(err.to_string())
    }
}

/// Startup paths surface governance failures as infrastructure errors.
impl From<GovernanceError> for service_core::error::AppError {
    fn from(err: GovernanceError) -> Self {
        match err {
            GovernanceError::Store(e) => service_core::error::AppError::DatabaseError(e),
            GovernanceError::Internal(e) => service_core::error::AppError::InternalError(e),
            other => service_core::error::AppError::InternalError(anyhow::anyhow!(other.to_string())),
        }
    }
}

impl IntoResponse for GovernanceError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();

        let (message, retry_after) = match &self {
            GovernanceError::Store(err) | GovernanceError::Internal(err) => {
                tracing::error!(error = %err, kind, "Governance operation failed");
                ("Internal server error".to_string(), None)
            }
            GovernanceError::RateLimited { retry_after } => (self.to_string(), Some(*retry_after)),
            _ => (self.to_string(), None),
        };

        error_response(status, kind, message, None, retry_after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_stable() {
        assert_eq!(GovernanceError::Unauthorized.kind(), "unauthorized");
        assert_eq!(
            GovernanceError::QuorumViolation {
                current: 2,
                required: 3
            }
            .kind(),
            "quorum_violation"
        );
        assert_eq!(
            GovernanceError::RequestNotPending {
                status: ReviewStatus::Approved
            }
            .status(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_internal_errors_hide_detail() {
        let response =
            GovernanceError::Store(anyhow::anyhow!("connection refused")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
