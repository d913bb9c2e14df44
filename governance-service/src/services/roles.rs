//! Role administration.

use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use super::access_guard::{AccessGuard, Actor};
use super::audit::AuditRecorder;
use super::clock::Clock;
use super::error::GovernanceError;
use super::store::GovernanceStore;
use crate::models::{
    AuditAction, EntityType, Permission, PermissionSet, Role, RoleResponse, SUPER_ADMIN,
};

/// Partial update of a role. Permission strings are parsed strictly.
#[derive(Debug, Clone, Default)]
pub struct RolePatch {
    pub description: Option<String>,
    pub permissions: Option<Vec<String>>,
    pub active: Option<bool>,
}

#[derive(Clone)]
pub struct RoleAdmin {
    store: Arc<dyn GovernanceStore>,
    clock: Arc<dyn Clock>,
    audit: AuditRecorder,
    super_admin_quorum: i64,
}

impl RoleAdmin {
    pub fn new(
        store: Arc<dyn GovernanceStore>,
        clock: Arc<dyn Clock>,
        audit: AuditRecorder,
        super_admin_quorum: i64,
    ) -> Self {
        Self {
            store,
            clock,
            audit,
            super_admin_quorum,
        }
    }

    pub async fn list_roles(
        &self,
        actor: Option<&Actor>,
    ) -> Result<Vec<RoleResponse>, GovernanceError> {
        AccessGuard::require_permission(actor, Permission::RoleRead)?;
        Ok(self
            .store
            .list_roles()
            .await?
            .into_iter()
            .map(RoleResponse::from)
            .collect())
    }

    #[instrument(skip(self, actor, description, permissions))]
    pub async fn create_role(
        &self,
        actor: Option<&Actor>,
        name: &str,
        description: Option<String>,
        permissions: &[String],
    ) -> Result<RoleResponse, GovernanceError> {
        let actor = AccessGuard::require_permission(actor, Permission::RoleManage)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(GovernanceError::ValidationFailed(
                "role name must not be empty".to_string(),
            ));
        }
        let permissions = PermissionSet::parse(permissions)?;
        if permissions.contains(Permission::AdminAll) {
            AccessGuard::require_role(Some(actor), SUPER_ADMIN)?;
        }

        let role = Role::new(name, description, permissions, self.clock.now());
        let entry = self
            .audit
            .entry(Some(actor), AuditAction::RoleCreated, EntityType::Role, role.role_id)
            .after(&role)
            .summary(format!("Role {} created", role.name));
        self.store.create_role(&role, &[entry]).await?;
        info!(role_id = %role.role_id, name = %role.name, "Role created");
        Ok(role.into())
    }

    #[instrument(skip(self, actor, patch))]
    pub async fn update_role(
        &self,
        actor: Option<&Actor>,
        role_id: Uuid,
        patch: RolePatch,
    ) -> Result<RoleResponse, GovernanceError> {
        let actor = AccessGuard::require_permission(actor, Permission::RoleManage)?;
        let before = self
            .store
            .find_role(role_id)
            .await?
            .ok_or_else(|| GovernanceError::not_found("Role"))?;

        let mut after = before.clone();
        if let Some(description) = patch.description {
            after.description = Some(description);
        }
        if let Some(raw) = &patch.permissions {
            after.permissions = PermissionSet::parse(raw)?;
        }
        if let Some(active) = patch.active {
            after.active = active;
        }

        let touches_wildcard = before.permissions.contains(Permission::AdminAll)
            || after.permissions.contains(Permission::AdminAll);
        if before.is_super_admin() || touches_wildcard {
            AccessGuard::require_role(Some(actor), SUPER_ADMIN)?;
        }
        // Disabling SUPER_ADMIN or stripping its wildcard removes it from
        // every holder at once.
        if before.is_super_admin()
            && (!after.active || !after.permissions.contains(Permission::AdminAll))
        {
            return Err(GovernanceError::QuorumViolation {
                current: self
                    .store
                    .count_role_holders(SUPER_ADMIN, self.clock.now())
                    .await?,
                required: self.super_admin_quorum,
            });
        }

        after.updated_utc = self.clock.now();

        let entry = self
            .audit
            .entry(Some(actor), AuditAction::RoleUpdated, EntityType::Role, role_id)
            .before(&before)
            .after(&after)
            .summary(format!("Role {} updated", after.name));
        self.store.update_role(&after, &[entry]).await?;
        info!(role_id = %role_id, "Role updated");
        Ok(after.into())
    }
}
