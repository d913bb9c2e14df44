//! Audit log model - append-only record of administrative mutations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Audit action tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    UserCreated,
    UserUpdated,
    UserDeleted,
    UserPurged,
    UserLocked,
    LoginFailed,
    LockoutCleared,
    UserProvisioned,
    RolesUpdated,
    RoleCreated,
    RoleUpdated,
    ChangeRequestCreated,
    ChangeRequestApproved,
    ChangeRequestRejected,
    ChangeRequestExpired,
    PendingApprovalCreated,
    PendingApprovalApproved,
    PendingApprovalRejected,
    PendingApprovalExpired,
    SessionCreated,
    SessionRevoked,
    SessionEnded,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::UserCreated => "user_created",
            AuditAction::UserUpdated => "user_updated",
            AuditAction::UserDeleted => "user_deleted",
            AuditAction::UserPurged => "user_purged",
            AuditAction::UserLocked => "user_locked",
            AuditAction::LoginFailed => "login_failed",
            AuditAction::LockoutCleared => "lockout_cleared",
            AuditAction::UserProvisioned => "user_provisioned",
            AuditAction::RolesUpdated => "roles_updated",
            AuditAction::RoleCreated => "role_created",
            AuditAction::RoleUpdated => "role_updated",
            AuditAction::ChangeRequestCreated => "change_request_created",
            AuditAction::ChangeRequestApproved => "change_request_approved",
            AuditAction::ChangeRequestRejected => "change_request_rejected",
            AuditAction::ChangeRequestExpired => "change_request_expired",
            AuditAction::PendingApprovalCreated => "pending_approval_created",
            AuditAction::PendingApprovalApproved => "pending_approval_approved",
            AuditAction::PendingApprovalRejected => "pending_approval_rejected",
            AuditAction::PendingApprovalExpired => "pending_approval_expired",
            AuditAction::SessionCreated => "session_created",
            AuditAction::SessionRevoked => "session_revoked",
            AuditAction::SessionEnded => "session_ended",
        }
    }

    /// Actions that count towards an actor's recent privileged activity.
    pub fn is_privileged(&self) -> bool {
        !matches!(
            self,
            AuditAction::SessionCreated
                | AuditAction::SessionEnded
                | AuditAction::UserLocked
                | AuditAction::LoginFailed
                | AuditAction::LockoutCleared
                | AuditAction::ChangeRequestExpired
                | AuditAction::PendingApprovalExpired
        )
    }

    pub fn privileged() -> Vec<AuditAction> {
        use AuditAction::*;
        [
            UserCreated,
            UserUpdated,
            UserDeleted,
            UserPurged,
            UserLocked,
            LoginFailed,
            LockoutCleared,
            UserProvisioned,
            RolesUpdated,
            RoleCreated,
            RoleUpdated,
            ChangeRequestCreated,
            ChangeRequestApproved,
            ChangeRequestRejected,
            ChangeRequestExpired,
            PendingApprovalCreated,
            PendingApprovalApproved,
            PendingApprovalRejected,
            PendingApprovalExpired,
            SessionCreated,
            SessionRevoked,
            SessionEnded,
        ]
        .into_iter()
        .filter(AuditAction::is_privileged)
        .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    User,
    Role,
    ChangeRequest,
    PendingApproval,
    Session,
}

/// Network/device metadata of the request that caused a mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub session_id: Option<Uuid>,
}

/// Audit log entry. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditLogEntry {
    pub entry_id: Uuid,
    pub actor_id: Option<Uuid>,
    pub target_id: Option<Uuid>,
    pub action: AuditAction,
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    pub before_state: Option<serde_json::Value>,
    pub after_state: Option<serde_json::Value>,
    pub summary: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub session_id: Option<Uuid>,
    pub risk_score: Option<f64>,
    pub anomalous: bool,
    pub created_utc: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn new(
        action: AuditAction,
        entity_type: EntityType,
        entity_id: Uuid,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            actor_id: None,
            target_id: None,
            action,
            entity_type,
            entity_id,
            before_state: None,
            after_state: None,
            summary: String::new(),
            ip_address: None,
            user_agent: None,
            session_id: None,
            risk_score: None,
            anomalous: false,
            created_utc: at,
        }
    }

    pub fn actor(mut self, actor_id: Option<Uuid>) -> Self {
        self.actor_id = actor_id;
        self
    }

    pub fn target(mut self, target_id: Uuid) -> Self {
        self.target_id = Some(target_id);
        self
    }

    pub fn before<T: Serialize>(mut self, state: &T) -> Self {
        self.before_state = serde_json::to_value(state).ok();
        self
    }

    pub fn after<T: Serialize>(mut self, state: &T) -> Self {
        self.after_state = serde_json::to_value(state).ok();
        self
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn meta(mut self, meta: &RequestMeta) -> Self {
        self.ip_address = meta.ip_address.clone();
        self.user_agent = meta.user_agent.clone();
        self.session_id = meta.session_id;
        self
    }

    pub fn risk(mut self, score: f64, anomalous: bool) -> Self {
        self.risk_score = Some(score);
        self.anomalous = anomalous;
        self
    }
}

/// Filter for `ListAuditLog`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditFilter {
    pub actor_id: Option<Uuid>,
    pub target_id: Option<Uuid>,
    pub action: Option<AuditAction>,
    pub entity_type: Option<EntityType>,
    pub entity_id: Option<Uuid>,
    pub from_utc: Option<DateTime<Utc>>,
    pub to_utc: Option<DateTime<Utc>>,
    #[serde(default)]
    pub anomalous_only: bool,
}

impl AuditFilter {
    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        self.actor_id.is_none_or(|id| entry.actor_id == Some(id))
            && self.target_id.is_none_or(|id| entry.target_id == Some(id))
            && self.action.is_none_or(|a| entry.action == a)
            && self.entity_type.is_none_or(|t| entry.entity_type == t)
            && self.entity_id.is_none_or(|id| entry.entity_id == id)
            && self.from_utc.is_none_or(|from| entry.created_utc >= from)
            && self.to_utc.is_none_or(|to| entry.created_utc < to)
            && (!self.anomalous_only || entry.anomalous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_builder_captures_meta_and_risk() {
        let now = Utc::now();
        let actor = Uuid::new_v4();
        let target = Uuid::new_v4();
        let session = Uuid::new_v4();
        let entry = AuditLogEntry::new(AuditAction::RolesUpdated, EntityType::User, target, now)
            .actor(Some(actor))
            .target(target)
            .before(&vec!["a"])
            .after(&vec!["b"])
            .summary("roles replaced")
            .meta(&RequestMeta {
                ip_address: Some("10.1.1.1".to_string()),
                user_agent: Some("curl".to_string()),
                session_id: Some(session),
            })
            .risk(0.9, true);

        assert_eq!(entry.actor_id, Some(actor));
        assert_eq!(entry.session_id, Some(session));
        assert_eq!(entry.before_state, Some(serde_json::json!(["a"])));
        assert!(entry.anomalous);
    }

    #[test]
    fn test_filter_time_window_and_anomalous() {
        let now = Utc::now();
        let entry = AuditLogEntry::new(AuditAction::UserUpdated, EntityType::User, Uuid::new_v4(), now);
        let filter = AuditFilter {
            from_utc: Some(now - Duration::hours(1)),
            to_utc: Some(now + Duration::hours(1)),
            ..Default::default()
        };
        assert!(filter.matches(&entry));

        let anomalies = AuditFilter {
            anomalous_only: true,
            ..Default::default()
        };
        assert!(!anomalies.matches(&entry));
    }

    #[test]
    fn test_session_noise_is_not_privileged() {
        assert!(!AuditAction::SessionCreated.is_privileged());
        assert!(AuditAction::RolesUpdated.is_privileged());
        assert!(!AuditAction::privileged().contains(&AuditAction::SessionEnded));
    }
}
