//! Pending approval model - JIT identities parked for manual review.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::change_request::{Resolution, ReviewStatus};
use crate::services::error::GovernanceError;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PendingApproval {
    pub pending_id: Uuid,
    pub provider: String,
    pub email: String,
    /// The inactive user created alongside this entry.
    pub user_id: Uuid,
    pub claims: serde_json::Value,
    pub role_ids: Vec<Uuid>,
    pub status: ReviewStatus,
    pub created_utc: DateTime<Utc>,
    pub expires_utc: DateTime<Utc>,
    pub resolved_by: Option<Uuid>,
    pub resolution_reason: Option<String>,
    pub resolved_utc: Option<DateTime<Utc>>,
}

impl PendingApproval {
    pub fn new(
        provider: &str,
        email: &str,
        user_id: Uuid,
        claims: serde_json::Value,
        role_ids: Vec<Uuid>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            pending_id: Uuid::new_v4(),
            provider: provider.to_string(),
            email: email.to_string(),
            user_id,
            claims,
            role_ids,
            status: ReviewStatus::Pending,
            created_utc: now,
            expires_utc: now + ttl,
            resolved_by: None,
            resolution_reason: None,
            resolved_utc: None,
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.status == ReviewStatus::Pending && self.expires_utc <= now
    }

    pub fn apply(&mut self, resolution: &Resolution) -> Result<(), GovernanceError> {
        self.status.ensure_transition(resolution.status)?;
        self.status = resolution.status;
        self.resolved_by = resolution.resolved_by;
        self.resolution_reason = resolution.reason.clone();
        self.resolved_utc = Some(resolution.at);
        Ok(())
    }
}
