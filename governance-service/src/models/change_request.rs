//! Change request model - queued role-set changes awaiting a second approver.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::services::error::GovernanceError;

/// Review lifecycle shared by change requests and pending approvals.
///
/// `Pending` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Rejected => "rejected",
            ReviewStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReviewStatus::Pending)
    }

    /// Validate a lifecycle step; only `Pending → terminal` is allowed.
    pub fn ensure_transition(self, next: ReviewStatus) -> Result<(), GovernanceError> {
        if self.is_terminal() {
            return Err(GovernanceError::RequestNotPending { status: self });
        }
        if !next.is_terminal() {
            return Err(GovernanceError::ValidationFailed(
                "a review can only move to a terminal status".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewStatus {
    type Err = GovernanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ReviewStatus::Pending),
            "approved" => Ok(ReviewStatus::Approved),
            "rejected" => Ok(ReviewStatus::Rejected),
            "expired" => Ok(ReviewStatus::Expired),
            other => Err(GovernanceError::ValidationFailed(format!(
                "unknown status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    RoleSetUpdate,
}

/// Approver decision on a change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Approve,
    Reject,
}

impl ChangeAction {
    pub fn target_status(&self) -> ReviewStatus {
        match self {
            ChangeAction::Approve => ReviewStatus::Approved,
            ChangeAction::Reject => ReviewStatus::Rejected,
        }
    }
}

/// Change request entity.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChangeRequest {
    pub request_id: Uuid,
    pub requester_id: Uuid,
    pub target_user_id: Uuid,
    pub change_type: ChangeType,
    pub proposed_role_ids: Vec<Uuid>,
    pub previous_role_ids: Vec<Uuid>,
    pub justification: String,
    pub status: ReviewStatus,
    pub emergency: bool,
    pub risk_score: f64,
    pub anomalous: bool,
    pub created_utc: DateTime<Utc>,
    pub expires_utc: DateTime<Utc>,
    pub resolved_by: Option<Uuid>,
    pub resolution_reason: Option<String>,
    pub resolved_utc: Option<DateTime<Utc>>,
}

impl ChangeRequest {
    #[allow(clippy::too_many_arguments)]
    pub fn role_set_update(
        requester_id: Uuid,
        target_user_id: Uuid,
        proposed_role_ids: Vec<Uuid>,
        previous_role_ids: Vec<Uuid>,
        justification: String,
        emergency: bool,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            requester_id,
            target_user_id,
            change_type: ChangeType::RoleSetUpdate,
            proposed_role_ids,
            previous_role_ids,
            justification,
            status: ReviewStatus::Pending,
            emergency,
            risk_score: 0.0,
            anomalous: false,
            created_utc: now,
            expires_utc: now + ttl,
            resolved_by: None,
            resolution_reason: None,
            resolved_utc: None,
        }
    }

    /// Pending but past its expiry; due for the `Expired` transition.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.status == ReviewStatus::Pending && self.expires_utc <= now
    }

    /// Apply a resolution in place after validating the transition.
    pub fn apply(&mut self, resolution: &Resolution) -> Result<(), GovernanceError> {
        self.status.ensure_transition(resolution.status)?;
        self.status = resolution.status;
        self.resolved_by = resolution.resolved_by;
        self.resolution_reason = resolution.reason.clone();
        self.resolved_utc = Some(resolution.at);
        Ok(())
    }
}

/// Terminal decision for a change request or pending approval.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub id: Uuid,
    pub status: ReviewStatus,
    pub resolved_by: Option<Uuid>,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

impl Resolution {
    pub fn expired(id: Uuid, at: DateTime<Utc>) -> Self {
        Self {
            id,
            status: ReviewStatus::Expired,
            resolved_by: None,
            reason: Some("expired without review".to_string()),
            at,
        }
    }
}
