//! Persistence seam for the governance core.
//!
//! Every method that mutates more than one row, or that must leave an audit
//! record, takes the audit entries to append and executes as one atomic unit:
//! either the whole mutation and its audit trail land, or nothing does.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use super::error::GovernanceError;
use crate::models::{
    AuditFilter, AuditLogEntry, ChangeRequest, PendingApproval, Resolution, ReviewStatus, Role,
    RoleAssignment, RoleSetReplacement, Session, User, UserFilter,
};

pub type StoreResult<T> = Result<T, GovernanceError>;

/// SUPER_ADMIN holders that must exist before a mutation may take the role
/// away from one of them.
///
/// Stores evaluate it inside the same unit of work as the mutation, after
/// serialising against every other guarded mutation, so two concurrent
/// removals cannot both pass on a stale count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuorumGuard {
    pub required: i64,
    pub at: DateTime<Utc>,
}

impl QuorumGuard {
    pub fn new(required: i64, at: DateTime<Utc>) -> Self {
        Self { required, at }
    }

    /// `holders` is the current count, the departing user included.
    pub fn check(&self, holders: i64) -> StoreResult<()> {
        if holders < self.required {
            warn!(current = holders, required = self.required, "SUPER_ADMIN quorum would be violated");
            return Err(GovernanceError::QuorumViolation {
                current: holders,
                required: self.required,
            });
        }
        Ok(())
    }
}

#[async_trait]
pub trait GovernanceStore: Send + Sync {
    async fn health_check(&self) -> StoreResult<()>;

    // ==================== Users ====================

    /// Insert a user, its credential hash and initial assignments.
    /// Fails with `DuplicateIdentity` on an email or username collision.
    async fn create_user(
        &self,
        user: &User,
        credential_hash: Option<&str>,
        assignments: &[RoleAssignment],
        audit: &[AuditLogEntry],
    ) -> StoreResult<()>;

    async fn find_user(&self, user_id: Uuid) -> StoreResult<Option<User>>;

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    /// Credential hash for the authentication path only.
    async fn find_credential(&self, user_id: Uuid) -> StoreResult<Option<String>>;

    async fn list_users(
        &self,
        filter: &UserFilter,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<User>, i64)>;

    /// Persist profile, status and lockout fields of `user`. With a guard,
    /// an update leaving a SUPER_ADMIN holder inactive or suspended is
    /// refused while the quorum is short.
    async fn update_user(
        &self,
        user: &User,
        quorum: Option<QuorumGuard>,
        audit: &[AuditLogEntry],
    ) -> StoreResult<()>;

    /// Deactivate the user, all of its role assignments and sessions.
    async fn soft_delete_user(
        &self,
        user_id: Uuid,
        at: DateTime<Utc>,
        quorum: Option<QuorumGuard>,
        audit: &[AuditLogEntry],
    ) -> StoreResult<()>;

    /// Remove the user together with its assignments and sessions.
    async fn purge_user(
        &self,
        user_id: Uuid,
        quorum: Option<QuorumGuard>,
        audit: &[AuditLogEntry],
    ) -> StoreResult<()>;

    /// Active, unsuspended, non-deleted users holding an effective
    /// assignment of the named (active) role.
    async fn count_role_holders(&self, role_name: &str, at: DateTime<Utc>) -> StoreResult<i64>;

    // ==================== Roles ====================

    async fn create_role(&self, role: &Role, audit: &[AuditLogEntry]) -> StoreResult<()>;

    /// Insert unless a role with the same name exists. Returns whether it
    /// was inserted; the audit entries are only written on insert.
    async fn create_role_if_absent(&self, role: &Role, audit: &[AuditLogEntry]) -> StoreResult<bool>;

    async fn update_role(&self, role: &Role, audit: &[AuditLogEntry]) -> StoreResult<()>;

    async fn find_role(&self, role_id: Uuid) -> StoreResult<Option<Role>>;

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>>;

    async fn list_roles(&self) -> StoreResult<Vec<Role>>;

    // ==================== Role assignments ====================

    /// Every assignment of the user, effective or not.
    async fn list_assignments(&self, user_id: Uuid) -> StoreResult<Vec<RoleAssignment>>;

    /// Roles granted by the user's effective assignments, in one round trip.
    async fn effective_roles(&self, user_id: Uuid, at: DateTime<Utc>) -> StoreResult<Vec<Role>>;

    /// Deactivate all active assignments of the user and insert the new set.
    async fn replace_role_set(
        &self,
        replacement: &RoleSetReplacement,
        quorum: Option<QuorumGuard>,
        audit: &[AuditLogEntry],
    ) -> StoreResult<Vec<RoleAssignment>>;

    // ==================== Change requests ====================

    async fn create_change_request(
        &self,
        request: &ChangeRequest,
        audit: &[AuditLogEntry],
    ) -> StoreResult<()>;

    async fn find_change_request(&self, request_id: Uuid) -> StoreResult<Option<ChangeRequest>>;

    async fn list_change_requests(
        &self,
        status: Option<ReviewStatus>,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<ChangeRequest>, i64)>;

    /// Pending requests whose expiry is at or before `at`.
    async fn list_stale_change_requests(&self, at: DateTime<Utc>) -> StoreResult<Vec<ChangeRequest>>;

    /// Move a pending request to a terminal status, optionally applying a
    /// role set replacement in the same unit. Fails with `RequestNotPending`
    /// when the request has already left `Pending`.
    async fn resolve_change_request(
        &self,
        resolution: &Resolution,
        replacement: Option<&RoleSetReplacement>,
        quorum: Option<QuorumGuard>,
        audit: &[AuditLogEntry],
    ) -> StoreResult<ChangeRequest>;

    // ==================== Pending approvals ====================

    /// Insert the inactive user and the approval entry together.
    async fn create_pending_approval(
        &self,
        user: &User,
        approval: &PendingApproval,
        audit: &[AuditLogEntry],
    ) -> StoreResult<()>;

    async fn find_pending_approval(&self, pending_id: Uuid) -> StoreResult<Option<PendingApproval>>;

    async fn list_pending_approvals(
        &self,
        status: Option<ReviewStatus>,
    ) -> StoreResult<Vec<PendingApproval>>;

    /// Move a pending approval to a terminal status. On `Approved` the user
    /// is activated and the approval's role ids are assigned.
    async fn resolve_pending_approval(
        &self,
        resolution: &Resolution,
        audit: &[AuditLogEntry],
    ) -> StoreResult<PendingApproval>;

    // ==================== Audit trail ====================

    async fn list_audit(
        &self,
        filter: &AuditFilter,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<AuditLogEntry>, i64)>;

    /// Privileged entries written by `actor_id` since `since`.
    async fn count_privileged_actions(
        &self,
        actor_id: Uuid,
        since: DateTime<Utc>,
    ) -> StoreResult<i64>;

    // ==================== Sessions ====================

    async fn create_session(&self, session: &Session, audit: &[AuditLogEntry]) -> StoreResult<()>;

    async fn find_session(&self, session_id: Uuid) -> StoreResult<Option<Session>>;

    async fn find_session_by_token(&self, token_hash: &str) -> StoreResult<Option<Session>>;

    async fn list_sessions(&self, user_id: Uuid) -> StoreResult<Vec<Session>>;

    /// Returns false when the session was already inactive.
    async fn deactivate_session(
        &self,
        session_id: Uuid,
        audit: &[AuditLogEntry],
    ) -> StoreResult<bool>;

    async fn touch_session(&self, session_id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;
}
