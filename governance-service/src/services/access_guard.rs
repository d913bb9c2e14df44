//! Authorization checks run before any read or mutation.

use serde::Serialize;
use uuid::Uuid;

use super::error::GovernanceError;
use super::permissions::EffectivePermissions;
use crate::models::{Permission, RequestMeta};

/// The authenticated caller of an operation.
#[derive(Debug, Clone, Serialize)]
pub struct Actor {
    pub user_id: Uuid,
    pub email: String,
    pub session_id: Option<Uuid>,
    pub permissions: EffectivePermissions,
    #[serde(skip)]
    pub meta: RequestMeta,
}

impl Actor {
    pub fn is_super_admin(&self) -> bool {
        self.permissions.is_super_admin()
    }
}

/// Stateless guard over an optional actor.
pub struct AccessGuard;

impl AccessGuard {
    pub fn authenticated(actor: Option<&Actor>) -> Result<&Actor, GovernanceError> {
        actor.ok_or(GovernanceError::Unauthorized)
    }

    pub fn require_permission(
        actor: Option<&Actor>,
        permission: Permission,
    ) -> Result<&Actor, GovernanceError> {
        let actor = Self::authenticated(actor)?;
        if actor.permissions.allows(permission) {
            Ok(actor)
        } else {
            tracing::warn!(user_id = %actor.user_id, permission = %permission, "Permission denied");
            Err(GovernanceError::Forbidden(format!(
                "missing permission '{}'",
                permission
            )))
        }
    }

    pub fn require_any_permission<'a>(
        actor: Option<&'a Actor>,
        permissions: &[Permission],
    ) -> Result<&'a Actor, GovernanceError> {
        let actor = Self::authenticated(actor)?;
        if permissions.iter().any(|p| actor.permissions.allows(*p)) {
            return Ok(actor);
        }
        let names: Vec<&str> = permissions.iter().map(|p| p.as_str()).collect();
        tracing::warn!(user_id = %actor.user_id, required = ?names, "Permission denied");
        Err(GovernanceError::Forbidden(format!(
            "requires one of: {}",
            names.join(", ")
        )))
    }

    pub fn require_role<'a>(
        actor: Option<&'a Actor>,
        role_name: &str,
    ) -> Result<&'a Actor, GovernanceError> {
        let actor = Self::authenticated(actor)?;
        if actor.permissions.has_role(role_name) {
            Ok(actor)
        } else {
            tracing::warn!(user_id = %actor.user_id, role = role_name, "Role required");
            Err(GovernanceError::Forbidden(format!("requires role {}", role_name)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PermissionSet, SUPER_ADMIN};

    fn actor(permissions: &[Permission], roles: &[&str]) -> Actor {
        Actor {
            user_id: Uuid::new_v4(),
            email: "actor@corp.example".to_string(),
            session_id: None,
            permissions: EffectivePermissions {
                permissions: permissions.iter().copied().collect::<PermissionSet>(),
                roles: roles.iter().map(|r| r.to_string()).collect(),
            },
            meta: RequestMeta::default(),
        }
    }

    #[test]
    fn test_missing_actor_is_unauthorized() {
        assert!(matches!(
            AccessGuard::require_permission(None, Permission::UserRead),
            Err(GovernanceError::Unauthorized)
        ));
        assert!(matches!(
            AccessGuard::require_role(None, SUPER_ADMIN),
            Err(GovernanceError::Unauthorized)
        ));
    }

    #[test]
    fn test_lacking_grant_is_forbidden() {
        let auditor = actor(&[Permission::AuditRead], &["AUDITOR"]);
        assert!(AccessGuard::require_permission(Some(&auditor), Permission::AuditRead).is_ok());
        assert!(matches!(
            AccessGuard::require_permission(Some(&auditor), Permission::UserDelete),
            Err(GovernanceError::Forbidden(_))
        ));
        assert!(matches!(
            AccessGuard::require_role(Some(&auditor), SUPER_ADMIN),
            Err(GovernanceError::Forbidden(_))
        ));
    }

    #[test]
    fn test_any_permission() {
        let requester = actor(&[Permission::UserRolesRequest], &[]);
        assert!(AccessGuard::require_any_permission(
            Some(&requester),
            &[Permission::UserRolesUpdate, Permission::UserRolesRequest]
        )
        .is_ok());
        assert!(AccessGuard::require_any_permission(
            Some(&requester),
            &[Permission::RoleManage]
        )
        .is_err());
    }
}
