//! In-process store used by tests and local runs without PostgreSQL.
//!
//! All state sits behind one write lock, so every composite operation is
//! atomic with respect to other callers, mirroring the SQL transactions of
//! [`super::database::Database`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::error::GovernanceError;
use super::store::{GovernanceStore, QuorumGuard, StoreResult};
use crate::models::{
    AuditFilter, AuditLogEntry, ChangeRequest, PendingApproval, Resolution, ReviewStatus, Role,
    RoleAssignment, RoleSetReplacement, Session, User, UserFilter, SUPER_ADMIN,
};

#[derive(Default)]
struct State {
    users: HashMap<Uuid, User>,
    credentials: HashMap<Uuid, String>,
    roles: HashMap<Uuid, Role>,
    assignments: Vec<RoleAssignment>,
    change_requests: HashMap<Uuid, ChangeRequest>,
    pending_approvals: HashMap<Uuid, PendingApproval>,
    audit: Vec<AuditLogEntry>,
    sessions: HashMap<Uuid, Session>,
}

impl State {
    fn ensure_unique_identity(&self, user: &User) -> StoreResult<()> {
        for other in self.users.values() {
            if other.user_id == user.user_id {
                continue;
            }
            if other.email == user.email {
                return Err(GovernanceError::DuplicateIdentity(format!(
                    "email '{}'",
                    user.email
                )));
            }
            if other.username == user.username {
                return Err(GovernanceError::DuplicateIdentity(format!(
                    "username '{}'",
                    user.username
                )));
            }
        }
        Ok(())
    }

    fn active_role(&self, name: &str) -> Option<&Role> {
        self.roles.values().find(|r| r.name == name && r.active)
    }

    /// Active, unsuspended, non-deleted users with an effective assignment
    /// of `role_id`.
    fn role_holders(&self, role_id: Uuid, at: DateTime<Utc>) -> Vec<Uuid> {
        let mut holders: Vec<Uuid> = self
            .assignments
            .iter()
            .filter(|a| a.role_id == role_id && a.is_effective(at))
            .filter(|a| {
                self.users
                    .get(&a.user_id)
                    .is_some_and(|u| u.active && !u.suspended && !u.is_deleted())
            })
            .map(|a| a.user_id)
            .collect();
        holders.sort();
        holders.dedup();
        holders
    }

    /// Refuse a mutation that takes SUPER_ADMIN from `user_id` while the
    /// quorum is short. `keeps` receives the SUPER_ADMIN role id and says
    /// whether the user still holds it afterwards.
    fn ensure_quorum(
        &self,
        quorum: Option<QuorumGuard>,
        user_id: Uuid,
        keeps: impl FnOnce(Uuid) -> bool,
    ) -> StoreResult<()> {
        let Some(guard) = quorum else {
            return Ok(());
        };
        let Some(role) = self.active_role(SUPER_ADMIN) else {
            return Ok(());
        };
        let holders = self.role_holders(role.role_id, guard.at);
        if !holders.contains(&user_id) || keeps(role.role_id) {
            return Ok(());
        }
        guard.check(holders.len() as i64)
    }

    fn replace_role_set(&mut self, replacement: &RoleSetReplacement) -> Vec<RoleAssignment> {
        for assignment in self
            .assignments
            .iter_mut()
            .filter(|a| a.user_id == replacement.user_id)
        {
            assignment.deactivate(replacement.at);
        }
        let fresh = replacement.assignments();
        self.assignments.extend(fresh.iter().cloned());
        fresh
    }

    fn append(&mut self, audit: &[AuditLogEntry]) {
        self.audit.extend(audit.iter().cloned());
    }
}

fn page<T: Clone>(items: &[T], limit: i64, offset: i64) -> Vec<T> {
    items
        .iter()
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .cloned()
        .collect()
}

#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GovernanceStore for InMemoryStore {
    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn create_user(
        &self,
        user: &User,
        credential_hash: Option<&str>,
        assignments: &[RoleAssignment],
        audit: &[AuditLogEntry],
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.ensure_unique_identity(user)?;
        state.users.insert(user.user_id, user.clone());
        if let Some(hash) = credential_hash {
            state.credentials.insert(user.user_id, hash.to_string());
        }
        state.assignments.extend(assignments.iter().cloned());
        state.append(audit);
        Ok(())
    }

    async fn find_user(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.state.read().await.users.get(&user_id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let email = email.to_lowercase();
        Ok(self
            .state
            .read()
            .await
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn find_credential(&self, user_id: Uuid) -> StoreResult<Option<String>> {
        Ok(self.state.read().await.credentials.get(&user_id).cloned())
    }

    async fn list_users(
        &self,
        filter: &UserFilter,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<User>, i64)> {
        let state = self.state.read().await;
        let mut users: Vec<User> = state
            .users
            .values()
            .filter(|u| filter.matches(u))
            .cloned()
            .collect();
        users.sort_by(|a, b| a.created_utc.cmp(&b.created_utc).then(a.email.cmp(&b.email)));
        let total = users.len() as i64;
        Ok((page(&users, limit, offset), total))
    }

    async fn update_user(
        &self,
        user: &User,
        quorum: Option<QuorumGuard>,
        audit: &[AuditLogEntry],
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if !state.users.contains_key(&user.user_id) {
            return Err(GovernanceError::not_found("User"));
        }
        state.ensure_unique_identity(user)?;
        state.ensure_quorum(quorum, user.user_id, |_| user.active && !user.suspended)?;
        state.users.insert(user.user_id, user.clone());
        state.append(audit);
        Ok(())
    }

    async fn soft_delete_user(
        &self,
        user_id: Uuid,
        at: DateTime<Utc>,
        quorum: Option<QuorumGuard>,
        audit: &[AuditLogEntry],
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.ensure_quorum(quorum, user_id, |_| false)?;
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| GovernanceError::not_found("User"))?;
        user.active = false;
        user.deleted_utc = Some(at);
        user.updated_utc = at;

        for assignment in state.assignments.iter_mut().filter(|a| a.user_id == user_id) {
            assignment.deactivate(at);
        }
        for session in state.sessions.values_mut().filter(|s| s.user_id == user_id) {
            session.active = false;
        }
        state.append(audit);
        Ok(())
    }

    async fn purge_user(
        &self,
        user_id: Uuid,
        quorum: Option<QuorumGuard>,
        audit: &[AuditLogEntry],
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.ensure_quorum(quorum, user_id, |_| false)?;
        if state.users.remove(&user_id).is_none() {
            return Err(GovernanceError::not_found("User"));
        }
        state.credentials.remove(&user_id);
        state.assignments.retain(|a| a.user_id != user_id);
        state.sessions.retain(|_, s| s.user_id != user_id);
        state.append(audit);
        Ok(())
    }

    async fn count_role_holders(&self, role_name: &str, at: DateTime<Utc>) -> StoreResult<i64> {
        let state = self.state.read().await;
        Ok(state
            .active_role(role_name)
            .map_or(0, |role| state.role_holders(role.role_id, at).len() as i64))
    }

    async fn create_role(&self, role: &Role, audit: &[AuditLogEntry]) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if state.roles.values().any(|r| r.name == role.name) {
            return Err(GovernanceError::DuplicateIdentity(format!(
                "role '{}'",
                role.name
            )));
        }
        state.roles.insert(role.role_id, role.clone());
        state.append(audit);
        Ok(())
    }

    async fn create_role_if_absent(&self, role: &Role, audit: &[AuditLogEntry]) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        if state.roles.values().any(|r| r.name == role.name) {
            return Ok(false);
        }
        state.roles.insert(role.role_id, role.clone());
        state.append(audit);
        Ok(true)
    }

    async fn update_role(&self, role: &Role, audit: &[AuditLogEntry]) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if state
            .roles
            .values()
            .any(|r| r.name == role.name && r.role_id != role.role_id)
        {
            return Err(GovernanceError::DuplicateIdentity(format!(
                "role '{}'",
                role.name
            )));
        }
        match state.roles.get_mut(&role.role_id) {
            Some(existing) => *existing = role.clone(),
            None => return Err(GovernanceError::not_found("Role")),
        }
        state.append(audit);
        Ok(())
    }

    async fn find_role(&self, role_id: Uuid) -> StoreResult<Option<Role>> {
        Ok(self.state.read().await.roles.get(&role_id).cloned())
    }

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>> {
        Ok(self
            .state
            .read()
            .await
            .roles
            .values()
            .find(|r| r.name == name)
            .cloned())
    }

    async fn list_roles(&self) -> StoreResult<Vec<Role>> {
        let mut roles: Vec<Role> = self.state.read().await.roles.values().cloned().collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn list_assignments(&self, user_id: Uuid) -> StoreResult<Vec<RoleAssignment>> {
        Ok(self
            .state
            .read()
            .await
            .assignments
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn effective_roles(&self, user_id: Uuid, at: DateTime<Utc>) -> StoreResult<Vec<Role>> {
        let state = self.state.read().await;
        let mut roles: Vec<Role> = state
            .assignments
            .iter()
            .filter(|a| a.user_id == user_id && a.is_effective(at))
            .filter_map(|a| state.roles.get(&a.role_id))
            .filter(|r| r.active)
            .cloned()
            .collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        roles.dedup_by(|a, b| a.role_id == b.role_id);
        Ok(roles)
    }

    async fn replace_role_set(
        &self,
        replacement: &RoleSetReplacement,
        quorum: Option<QuorumGuard>,
        audit: &[AuditLogEntry],
    ) -> StoreResult<Vec<RoleAssignment>> {
        let mut state = self.state.write().await;
        if !state.users.contains_key(&replacement.user_id) {
            return Err(GovernanceError::not_found("User"));
        }
        state.ensure_quorum(quorum, replacement.user_id, |id| {
            replacement.role_ids.contains(&id)
        })?;
        let fresh = state.replace_role_set(replacement);
        state.append(audit);
        Ok(fresh)
    }

    async fn create_change_request(
        &self,
        request: &ChangeRequest,
        audit: &[AuditLogEntry],
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.change_requests.insert(request.request_id, request.clone());
        state.append(audit);
        Ok(())
    }

    async fn find_change_request(&self, request_id: Uuid) -> StoreResult<Option<ChangeRequest>> {
        Ok(self
            .state
            .read()
            .await
            .change_requests
            .get(&request_id)
            .cloned())
    }

    async fn list_change_requests(
        &self,
        status: Option<ReviewStatus>,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<ChangeRequest>, i64)> {
        let state = self.state.read().await;
        let mut requests: Vec<ChangeRequest> = state
            .change_requests
            .values()
            .filter(|cr| status.is_none_or(|s| cr.status == s))
            .cloned()
            .collect();
        requests.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        let total = requests.len() as i64;
        Ok((page(&requests, limit, offset), total))
    }

    async fn list_stale_change_requests(&self, at: DateTime<Utc>) -> StoreResult<Vec<ChangeRequest>> {
        Ok(self
            .state
            .read()
            .await
            .change_requests
            .values()
            .filter(|cr| cr.is_stale(at))
            .cloned()
            .collect())
    }

    async fn resolve_change_request(
        &self,
        resolution: &Resolution,
        replacement: Option<&RoleSetReplacement>,
        quorum: Option<QuorumGuard>,
        audit: &[AuditLogEntry],
    ) -> StoreResult<ChangeRequest> {
        let mut state = self.state.write().await;
        let mut request = state
            .change_requests
            .get(&resolution.id)
            .cloned()
            .ok_or_else(|| GovernanceError::not_found("Change request"))?;
        request.apply(resolution)?;

        if let Some(replacement) = replacement {
            if !state.users.contains_key(&replacement.user_id) {
                return Err(GovernanceError::not_found("User"));
            }
            state.ensure_quorum(quorum, replacement.user_id, |id| {
                replacement.role_ids.contains(&id)
            })?;
            state.replace_role_set(replacement);
        }
        state.change_requests.insert(request.request_id, request.clone());
        state.append(audit);
        Ok(request)
    }

    async fn create_pending_approval(
        &self,
        user: &User,
        approval: &PendingApproval,
        audit: &[AuditLogEntry],
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.ensure_unique_identity(user)?;
        state.users.insert(user.user_id, user.clone());
        state
            .pending_approvals
            .insert(approval.pending_id, approval.clone());
        state.append(audit);
        Ok(())
    }

    async fn find_pending_approval(&self, pending_id: Uuid) -> StoreResult<Option<PendingApproval>> {
        Ok(self
            .state
            .read()
            .await
            .pending_approvals
            .get(&pending_id)
            .cloned())
    }

    async fn list_pending_approvals(
        &self,
        status: Option<ReviewStatus>,
    ) -> StoreResult<Vec<PendingApproval>> {
        let state = self.state.read().await;
        let mut approvals: Vec<PendingApproval> = state
            .pending_approvals
            .values()
            .filter(|p| status.is_none_or(|s| p.status == s))
            .cloned()
            .collect();
        approvals.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        Ok(approvals)
    }

    async fn resolve_pending_approval(
        &self,
        resolution: &Resolution,
        audit: &[AuditLogEntry],
    ) -> StoreResult<PendingApproval> {
        let mut state = self.state.write().await;
        let mut approval = state
            .pending_approvals
            .get(&resolution.id)
            .cloned()
            .ok_or_else(|| GovernanceError::not_found("Pending approval"))?;
        approval.apply(resolution)?;

        if approval.status == ReviewStatus::Approved {
            let user = state
                .users
                .get_mut(&approval.user_id)
                .ok_or_else(|| GovernanceError::not_found("User"))?;
            user.active = true;
            user.updated_utc = resolution.at;

            let replacement = RoleSetReplacement {
                user_id: approval.user_id,
                role_ids: approval.role_ids.clone(),
                assigned_by: resolution.resolved_by,
                at: resolution.at,
            };
            state.replace_role_set(&replacement);
        }
        state
            .pending_approvals
            .insert(approval.pending_id, approval.clone());
        state.append(audit);
        Ok(approval)
    }

    async fn list_audit(
        &self,
        filter: &AuditFilter,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<AuditLogEntry>, i64)> {
        let state = self.state.read().await;
        // Newest first; entries are appended in time order.
        let entries: Vec<AuditLogEntry> = state
            .audit
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        let total = entries.len() as i64;
        Ok((page(&entries, limit, offset), total))
    }

    async fn count_privileged_actions(
        &self,
        actor_id: Uuid,
        since: DateTime<Utc>,
    ) -> StoreResult<i64> {
        Ok(self
            .state
            .read()
            .await
            .audit
            .iter()
            .filter(|e| {
                e.actor_id == Some(actor_id) && e.created_utc >= since && e.action.is_privileged()
            })
            .count() as i64)
    }

    async fn create_session(&self, session: &Session, audit: &[AuditLogEntry]) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.sessions.insert(session.session_id, session.clone());
        if let Some(user) = state.users.get_mut(&session.user_id) {
            user.last_login_utc = Some(session.created_utc);
        }
        state.append(audit);
        Ok(())
    }

    async fn find_session(&self, session_id: Uuid) -> StoreResult<Option<Session>> {
        Ok(self.state.read().await.sessions.get(&session_id).cloned())
    }

    async fn find_session_by_token(&self, token_hash: &str) -> StoreResult<Option<Session>> {
        Ok(self
            .state
            .read()
            .await
            .sessions
            .values()
            .find(|s| s.token_hash == token_hash)
            .cloned())
    }

    async fn list_sessions(&self, user_id: Uuid) -> StoreResult<Vec<Session>> {
        let mut sessions: Vec<Session> = self
            .state
            .read()
            .await
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        Ok(sessions)
    }

    async fn deactivate_session(
        &self,
        session_id: Uuid,
        audit: &[AuditLogEntry],
    ) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        let Some(session) = state.sessions.get_mut(&session_id) else {
            return Ok(false);
        };
        if !session.active {
            return Ok(false);
        }
        session.active = false;
        state.append(audit);
        Ok(true)
    }

    async fn touch_session(&self, session_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        if let Some(session) = self.state.write().await.sessions.get_mut(&session_id) {
            session.last_activity_utc = at;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuditAction, EntityType, Permission};
    use chrono::Duration;

    fn role(name: &str, now: DateTime<Utc>) -> Role {
        Role::new(name, None, [Permission::UserRead].into_iter().collect(), now)
    }

    #[tokio::test]
    async fn test_duplicate_email_is_rejected() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store
            .create_user(&User::new("a@x.io", "a", None, now), None, &[], &[])
            .await
            .unwrap();

        let err = store
            .create_user(&User::new("A@X.io", "other", None, now), None, &[], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::DuplicateIdentity(_)));
    }

    #[tokio::test]
    async fn test_replace_role_set_deactivates_previous() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let user = User::new("u@x.io", "u", None, now);
        let r1 = role("R1", now);
        let r2 = role("R2", now);
        store.create_role(&r1, &[]).await.unwrap();
        store.create_role(&r2, &[]).await.unwrap();
        store
            .create_user(
                &user,
                None,
                &[RoleAssignment::new(user.user_id, r1.role_id, None, now)],
                &[],
            )
            .await
            .unwrap();

        let later = now + Duration::minutes(1);
        let entry = AuditLogEntry::new(AuditAction::RolesUpdated, EntityType::User, user.user_id, later);
        store
            .replace_role_set(
                &RoleSetReplacement {
                    user_id: user.user_id,
                    role_ids: vec![r2.role_id],
                    assigned_by: None,
                    at: later,
                },
                None,
                &[entry],
            )
            .await
            .unwrap();

        let roles = store.effective_roles(user.user_id, later).await.unwrap();
        assert_eq!(roles.len(), 1);
        assert_eq!(roles[0].name, "R2");
        assert_eq!(store.list_assignments(user.user_id).await.unwrap().len(), 2);

        let (entries, total) = store.list_audit(&AuditFilter::default(), 10, 0).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(entries[0].entity_id, user.user_id);
    }

    #[tokio::test]
    async fn test_quorum_is_rechecked_inside_the_mutation() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let super_admin = Role::new(
            SUPER_ADMIN,
            None,
            [Permission::AdminAll].into_iter().collect(),
            now,
        );
        store.create_role(&super_admin, &[]).await.unwrap();

        let mut holders = Vec::new();
        for name in ["a", "b", "c"] {
            let user = User::new(&format!("{}@x.io", name), name, None, now);
            let grant = RoleAssignment::new(user.user_id, super_admin.role_id, None, now);
            store.create_user(&user, None, &[grant], &[]).await.unwrap();
            holders.push(user.user_id);
        }
        let guard = Some(QuorumGuard::new(3, now));

        // Both callers saw three holders before either wrote.
        store
            .soft_delete_user(holders[2], now, guard, &[])
            .await
            .unwrap();
        let entry = AuditLogEntry::new(AuditAction::UserDeleted, EntityType::User, holders[0], now);
        let err = store
            .soft_delete_user(holders[0], now, guard, &[entry])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GovernanceError::QuorumViolation {
                current: 2,
                required: 3
            }
        ));
        assert_eq!(store.count_role_holders(SUPER_ADMIN, now).await.unwrap(), 2);
        let (_, total) = store.list_audit(&AuditFilter::default(), 10, 0).await.unwrap();
        assert_eq!(total, 0);

        // Keeping the role is never a removal.
        store
            .replace_role_set(
                &RoleSetReplacement {
                    user_id: holders[0],
                    role_ids: vec![super_admin.role_id],
                    assigned_by: None,
                    at: now,
                },
                guard,
                &[],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_failed_resolution_writes_nothing() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let mut cr = ChangeRequest::role_set_update(
            Uuid::new_v4(),
            Uuid::new_v4(),
            vec![],
            vec![],
            "justification".to_string(),
            false,
            now,
            Duration::hours(1),
        );
        cr.status = ReviewStatus::Rejected;
        store.create_change_request(&cr, &[]).await.unwrap();

        let entry =
            AuditLogEntry::new(AuditAction::ChangeRequestApproved, EntityType::ChangeRequest, cr.request_id, now);
        let err = store
            .resolve_change_request(
                &Resolution {
                    id: cr.request_id,
                    status: ReviewStatus::Approved,
                    resolved_by: None,
                    reason: None,
                    at: now,
                },
                None,
                None,
                &[entry],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::RequestNotPending { .. }));

        let (_, total) = store.list_audit(&AuditFilter::default(), 10, 0).await.unwrap();
        assert_eq!(total, 0);
    }
}
