//! Session model - one authenticated login.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub session_id: Uuid,
    pub user_id: Uuid,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub active: bool,
    pub created_utc: DateTime<Utc>,
    pub expires_utc: DateTime<Utc>,
    pub last_activity_utc: DateTime<Utc>,
}

impl Session {
    /// Active and not yet expired. Anything else is treated as absent.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_utc > now
    }
}

/// Session info for API responses.
#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub expires_utc: DateTime<Utc>,
    pub last_activity_utc: DateTime<Utc>,
    pub is_current: bool,
}

impl SessionInfo {
    pub fn from_session(s: Session, current: Option<Uuid>) -> Self {
        Self {
            is_current: current == Some(s.session_id),
            session_id: s.session_id,
            user_id: s.user_id,
            ip_address: s.ip_address,
            user_agent: s.user_agent,
            created_utc: s.created_utc,
            expires_utc: s.expires_utc,
            last_activity_utc: s.last_activity_utc,
        }
    }
}
