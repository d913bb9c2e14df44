//! User administration: create, read, update.
//!
//! Deletion lives in the governance engine because of the quorum rule.

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::access_guard::{AccessGuard, Actor};
use super::anomaly::{ActionFeatures, AnomalyScorer};
use super::audit::{AuditRecorder, MAX_PAGE_SIZE};
use super::clock::Clock;
use super::error::GovernanceError;
use super::metrics;
use super::permissions::EffectivePermissions;
use super::store::{GovernanceStore, QuorumGuard};
use crate::config::GovernanceSettings;
use crate::models::{
    user::email_domain, AuditAction, EntityType, Permission, Role, RoleAssignment, User,
    UserFilter, UserPatch, UserResponse, SUPER_ADMIN,
};
use crate::utils::{hash_password, Password};

pub const MIN_PASSWORD_LENGTH: usize = 12;

/// Input of `create_user`.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub display_name: Option<String>,
    pub password: Option<Password>,
    pub role_names: Vec<String>,
}

/// A user together with its effective role names.
#[derive(Debug, Serialize)]
pub struct UserWithRoles {
    #[serde(flatten)]
    pub user: UserResponse,
    pub roles: Vec<String>,
}

/// The caller's own profile, with resolved permissions.
#[derive(Debug, Serialize)]
pub struct Profile {
    #[serde(flatten)]
    pub user: UserResponse,
    pub session_id: Option<Uuid>,
    #[serde(flatten)]
    pub permissions: EffectivePermissions,
}

#[derive(Clone)]
pub struct UserAdmin {
    store: Arc<dyn GovernanceStore>,
    clock: Arc<dyn Clock>,
    audit: AuditRecorder,
    scorer: AnomalyScorer,
    super_admin_quorum: i64,
}

impl UserAdmin {
    pub fn new(
        store: Arc<dyn GovernanceStore>,
        clock: Arc<dyn Clock>,
        audit: AuditRecorder,
        settings: &GovernanceSettings,
    ) -> Self {
        Self {
            store,
            clock,
            audit,
            scorer: AnomalyScorer::new(settings.admin_utc_offset_minutes),
            super_admin_quorum: settings.super_admin_quorum,
        }
    }

    /// Create a local user with its initial roles in one transaction.
    ///
    /// Initial roles are part of provisioning the account and need only
    /// `user:create`, except that roles carrying `admin:*` can only be
    /// granted by a SUPER_ADMIN. The grant is risk scored like a role change.
    #[instrument(skip(self, actor, input), fields(email = %input.email))]
    pub async fn create_user(
        &self,
        actor: Option<&Actor>,
        input: NewUser,
    ) -> Result<UserWithRoles, GovernanceError> {
        let actor = AccessGuard::require_permission(actor, Permission::UserCreate)?;

        if email_domain(input.email.trim()).is_none() {
            return Err(GovernanceError::ValidationFailed(
                "email must contain a domain".to_string(),
            ));
        }
        if input.username.trim().is_empty() {
            return Err(GovernanceError::ValidationFailed(
                "username must not be empty".to_string(),
            ));
        }

        let mut roles: Vec<Role> = Vec::with_capacity(input.role_names.len());
        for name in &input.role_names {
            match self.store.find_role_by_name(name).await? {
                Some(role) if role.active => {
                    if role.permissions.contains(Permission::AdminAll) {
                        AccessGuard::require_role(Some(actor), SUPER_ADMIN)?;
                    }
                    if !roles.iter().any(|r| r.role_id == role.role_id) {
                        roles.push(role);
                    }
                }
                _ => {
                    return Err(GovernanceError::ValidationFailed(format!(
                        "unknown or inactive role '{}'",
                        name
                    )))
                }
            }
        }

        let credential = match &input.password {
            Some(password) if password.len() < MIN_PASSWORD_LENGTH => {
                return Err(GovernanceError::ValidationFailed(format!(
                    "password must be at least {} characters",
                    MIN_PASSWORD_LENGTH
                )))
            }
            Some(password) => Some(hash_password(password)?.into_string()),
            None => None,
        };

        let now = self.clock.now();
        let user = User::new(&input.email, &input.username, input.display_name, now);
        let assignments: Vec<RoleAssignment> = roles
            .iter()
            .map(|role| RoleAssignment::new(user.user_id, role.role_id, Some(actor.user_id), now))
            .collect();
        let role_names: Vec<String> = roles.iter().map(|r| r.name.clone()).collect();
        let features = ActionFeatures::at(now)
            .granting(!roles.is_empty())
            .touching(roles.len());
        let risk = self
            .scorer
            .assess(self.store.as_ref(), actor.user_id, features)
            .await?;

        let entry = self
            .audit
            .entry(Some(actor), AuditAction::UserCreated, EntityType::User, user.user_id)
            .target(user.user_id)
            .after(&serde_json::json!({
                "user": UserResponse::from(user.clone()),
                "roles": role_names,
            }))
            .summary(format!("User {} created", user.email))
            .risk(risk.value(), risk.is_anomalous());

        self.store
            .create_user(&user, credential.as_deref(), &assignments, &[entry])
            .await?;
        if risk.is_anomalous() {
            metrics::record_anomaly();
            warn!(user_id = %user.user_id, risk = risk.value(), "Anomalous user creation");
        }
        info!(user_id = %user.user_id, roles = role_names.len(), "User created");

        Ok(UserWithRoles {
            user: user.into(),
            roles: role_names,
        })
    }

    #[instrument(skip(self, actor, filter))]
    pub async fn list_users(
        &self,
        actor: Option<&Actor>,
        filter: &UserFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<UserResponse>, i64), GovernanceError> {
        AccessGuard::require_permission(actor, Permission::UserRead)?;
        let (users, total) = self
            .store
            .list_users(filter, limit.clamp(1, MAX_PAGE_SIZE), offset.max(0))
            .await?;
        Ok((users.into_iter().map(UserResponse::from).collect(), total))
    }

    #[instrument(skip(self, actor))]
    pub async fn get_user(
        &self,
        actor: Option<&Actor>,
        user_id: Uuid,
    ) -> Result<UserWithRoles, GovernanceError> {
        AccessGuard::require_permission(actor, Permission::UserRead)?;
        let user = self
            .store
            .find_user(user_id)
            .await?
            .ok_or_else(|| GovernanceError::not_found("User"))?;
        let roles = self
            .store
            .effective_roles(user_id, self.clock.now())
            .await?
            .into_iter()
            .map(|r| r.name)
            .collect();
        Ok(UserWithRoles {
            user: user.into(),
            roles,
        })
    }

    /// Profile of the authenticated caller.
    pub async fn me(&self, actor: Option<&Actor>) -> Result<Profile, GovernanceError> {
        let actor = AccessGuard::authenticated(actor)?;
        let user = self
            .store
            .find_user(actor.user_id)
            .await?
            .ok_or(GovernanceError::Unauthorized)?;
        Ok(Profile {
            user: user.into(),
            session_id: actor.session_id,
            permissions: actor.permissions.clone(),
        })
    }

    #[instrument(skip(self, actor, patch), fields(actor_id = ?actor.map(|a| a.user_id)))]
    pub async fn update_user(
        &self,
        actor: Option<&Actor>,
        target_id: Uuid,
        patch: UserPatch,
    ) -> Result<UserResponse, GovernanceError> {
        let actor = AccessGuard::require_permission(actor, Permission::UserUpdate)?;
        if patch.is_empty() {
            return Err(GovernanceError::ValidationFailed(
                "no fields to update".to_string(),
            ));
        }
        if actor.user_id == target_id && patch.disables() {
            return Err(GovernanceError::SelfActionForbidden(
                "cannot suspend or deactivate your own account".to_string(),
            ));
        }
        if let Some(email) = &patch.email {
            if email_domain(email.trim()).is_none() {
                return Err(GovernanceError::ValidationFailed(
                    "email must contain a domain".to_string(),
                ));
            }
        }
        if patch.username.as_deref().is_some_and(|u| u.trim().is_empty()) {
            return Err(GovernanceError::ValidationFailed(
                "username must not be empty".to_string(),
            ));
        }

        let before = self
            .store
            .find_user(target_id)
            .await?
            .filter(|u| !u.is_deleted())
            .ok_or_else(|| GovernanceError::not_found("User"))?;

        let now = self.clock.now();
        let disables = patch.disables() && before.active && !before.suspended;
        let mut after = before.clone();
        patch.apply(&mut after, now);

        let mut entry = self
            .audit
            .entry(Some(actor), AuditAction::UserUpdated, EntityType::User, target_id)
            .target(target_id)
            .before(&UserResponse::from(before))
            .after(&UserResponse::from(after.clone()))
            .summary(format!("User {} updated", after.email));

        // Suspension and deactivation are scored; profile edits are not.
        let quorum = if disables {
            let risk = self
                .scorer
                .assess(self.store.as_ref(), actor.user_id, ActionFeatures::at(now))
                .await?;
            if risk.is_anomalous() {
                metrics::record_anomaly();
                warn!(target_id = %target_id, risk = risk.value(), "Anomalous account suspension");
            }
            entry = entry.risk(risk.value(), risk.is_anomalous());
            Some(QuorumGuard::new(self.super_admin_quorum, now))
        } else {
            None
        };

        self.store.update_user(&after, quorum, &[entry]).await?;
        info!(target_id = %target_id, "User updated");

        Ok(after.into())
    }
}
