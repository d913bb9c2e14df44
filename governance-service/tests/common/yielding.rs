//! Store wrapper that yields to the scheduler before every call, so
//! futures joined on one task interleave between their reads and writes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governance_service::{
    models::{
        AuditFilter, AuditLogEntry, ChangeRequest, PendingApproval, Resolution, ReviewStatus,
        Role, RoleAssignment, RoleSetReplacement, Session, User, UserFilter,
    },
    services::{GovernanceStore, InMemoryStore, QuorumGuard, StoreResult},
};
use tokio::task::yield_now;
use uuid::Uuid;

#[derive(Default)]
pub struct YieldingStore {
    inner: InMemoryStore,
}

impl YieldingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GovernanceStore for YieldingStore {
    async fn health_check(&self) -> StoreResult<()> {
        self.inner.health_check().await
    }

    async fn create_user(
        &self,
        user: &User,
        credential_hash: Option<&str>,
        assignments: &[RoleAssignment],
        audit: &[AuditLogEntry],
    ) -> StoreResult<()> {
        yield_now().await;
        self.inner
            .create_user(user, credential_hash, assignments, audit)
            .await
    }

    async fn find_user(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        yield_now().await;
        self.inner.find_user(user_id).await
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        yield_now().await;
        self.inner.find_user_by_email(email).await
    }

    async fn find_credential(&self, user_id: Uuid) -> StoreResult<Option<String>> {
        yield_now().await;
        self.inner.find_credential(user_id).await
    }

    async fn list_users(
        &self,
        filter: &UserFilter,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<User>, i64)> {
        yield_now().await;
        self.inner.list_users(filter, limit, offset).await
    }

    async fn update_user(
        &self,
        user: &User,
        quorum: Option<QuorumGuard>,
        audit: &[AuditLogEntry],
    ) -> StoreResult<()> {
        yield_now().await;
        self.inner.update_user(user, quorum, audit).await
    }

    async fn soft_delete_user(
        &self,
        user_id: Uuid,
        at: DateTime<Utc>,
        quorum: Option<QuorumGuard>,
        audit: &[AuditLogEntry],
    ) -> StoreResult<()> {
        yield_now().await;
        self.inner.soft_delete_user(user_id, at, quorum, audit).await
    }

    async fn purge_user(
        &self,
        user_id: Uuid,
        quorum: Option<QuorumGuard>,
        audit: &[AuditLogEntry],
    ) -> StoreResult<()> {
        yield_now().await;
        self.inner.purge_user(user_id, quorum, audit).await
    }

    async fn count_role_holders(&self, role_name: &str, at: DateTime<Utc>) -> StoreResult<i64> {
        yield_now().await;
        self.inner.count_role_holders(role_name, at).await
    }

    async fn create_role(&self, role: &Role, audit: &[AuditLogEntry]) -> StoreResult<()> {
        yield_now().await;
        self.inner.create_role(role, audit).await
    }

    async fn create_role_if_absent(&self, role: &Role, audit: &[AuditLogEntry]) -> StoreResult<bool> {
        yield_now().await;
        self.inner.create_role_if_absent(role, audit).await
    }

    async fn update_role(&self, role: &Role, audit: &[AuditLogEntry]) -> StoreResult<()> {
        yield_now().await;
        self.inner.update_role(role, audit).await
    }

    async fn find_role(&self, role_id: Uuid) -> StoreResult<Option<Role>> {
        yield_now().await;
        self.inner.find_role(role_id).await
    }

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>> {
        yield_now().await;
        self.inner.find_role_by_name(name).await
    }

    async fn list_roles(&self) -> StoreResult<Vec<Role>> {
        yield_now().await;
        self.inner.list_roles().await
    }

    async fn list_assignments(&self, user_id: Uuid) -> StoreResult<Vec<RoleAssignment>> {
        yield_now().await;
        self.inner.list_assignments(user_id).await
    }

    async fn effective_roles(&self, user_id: Uuid, at: DateTime<Utc>) -> StoreResult<Vec<Role>> {
        yield_now().await;
        self.inner.effective_roles(user_id, at).await
    }

    async fn replace_role_set(
        &self,
        replacement: &RoleSetReplacement,
        quorum: Option<QuorumGuard>,
        audit: &[AuditLogEntry],
    ) -> StoreResult<Vec<RoleAssignment>> {
        yield_now().await;
        self.inner.replace_role_set(replacement, quorum, audit).await
    }

    async fn create_change_request(
        &self,
        request: &ChangeRequest,
        audit: &[AuditLogEntry],
    ) -> StoreResult<()> {
        yield_now().await;
        self.inner.create_change_request(request, audit).await
    }

    async fn find_change_request(&self, request_id: Uuid) -> StoreResult<Option<ChangeRequest>> {
        yield_now().await;
        self.inner.find_change_request(request_id).await
    }

    async fn list_change_requests(
        &self,
        status: Option<ReviewStatus>,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<ChangeRequest>, i64)> {
        yield_now().await;
        self.inner.list_change_requests(status, limit, offset).await
    }

    async fn list_stale_change_requests(&self, at: DateTime<Utc>) -> StoreResult<Vec<ChangeRequest>> {
        yield_now().await;
        self.inner.list_stale_change_requests(at).await
    }

    async fn resolve_change_request(
        &self,
        resolution: &Resolution,
        replacement: Option<&RoleSetReplacement>,
        quorum: Option<QuorumGuard>,
        audit: &[AuditLogEntry],
    ) -> StoreResult<ChangeRequest> {
        yield_now().await;
        self.inner
            .resolve_change_request(resolution, replacement, quorum, audit)
            .await
    }

    async fn create_pending_approval(
        &self,
        user: &User,
        approval: &PendingApproval,
        audit: &[AuditLogEntry],
    ) -> StoreResult<()> {
        yield_now().await;
        self.inner.create_pending_approval(user, approval, audit).await
    }

    async fn find_pending_approval(&self, pending_id: Uuid) -> StoreResult<Option<PendingApproval>> {
        yield_now().await;
        self.inner.find_pending_approval(pending_id).await
    }

    async fn list_pending_approvals(
        &self,
        status: Option<ReviewStatus>,
    ) -> StoreResult<Vec<PendingApproval>> {
        yield_now().await;
        self.inner.list_pending_approvals(status).await
    }

    async fn resolve_pending_approval(
        &self,
        resolution: &Resolution,
        audit: &[AuditLogEntry],
    ) -> StoreResult<PendingApproval> {
        yield_now().await;
        self.inner.resolve_pending_approval(resolution, audit).await
    }

    async fn list_audit(
        &self,
        filter: &AuditFilter,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<AuditLogEntry>, i64)> {
        yield_now().await;
        self.inner.list_audit(filter, limit, offset).await
    }

    async fn count_privileged_actions(
        &self,
        actor_id: Uuid,
        since: DateTime<Utc>,
    ) -> StoreResult<i64> {
        yield_now().await;
        self.inner.count_privileged_actions(actor_id, since).await
    }

    async fn create_session(&self, session: &Session, audit: &[AuditLogEntry]) -> StoreResult<()> {
        yield_now().await;
        self.inner.create_session(session, audit).await
    }

    async fn find_session(&self, session_id: Uuid) -> StoreResult<Option<Session>> {
        yield_now().await;
        self.inner.find_session(session_id).await
    }

    async fn find_session_by_token(&self, token_hash: &str) -> StoreResult<Option<Session>> {
        yield_now().await;
        self.inner.find_session_by_token(token_hash).await
    }

    async fn list_sessions(&self, user_id: Uuid) -> StoreResult<Vec<Session>> {
        yield_now().await;
        self.inner.list_sessions(user_id).await
    }

    async fn deactivate_session(
        &self,
        session_id: Uuid,
        audit: &[AuditLogEntry],
    ) -> StoreResult<bool> {
        yield_now().await;
        self.inner.deactivate_session(session_id, audit).await
    }

    async fn touch_session(&self, session_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        yield_now().await;
        self.inner.touch_session(session_id, at).await
    }
}
