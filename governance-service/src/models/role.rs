//! Role model - named permission bundles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::permission::{Permission, PermissionSet};

pub const SUPER_ADMIN: &str = "SUPER_ADMIN";
pub const USER_ADMIN: &str = "USER_ADMIN";
pub const AUDITOR: &str = "AUDITOR";
pub const ANALYST: &str = "ANALYST";

/// Role entity.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Role {
    pub role_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    #[sqlx(try_from = "Vec<String>")]
    pub permissions: PermissionSet,
    pub active: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Role {
    pub fn new(
        name: impl Into<String>,
        description: Option<String>,
        permissions: PermissionSet,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            role_id: Uuid::new_v4(),
            name: name.into(),
            description,
            permissions,
            active: true,
            created_utc: now,
            updated_utc: now,
        }
    }

    pub fn is_super_admin(&self) -> bool {
        self.name == SUPER_ADMIN
    }

    /// Reference roles seeded at startup.
    pub fn defaults(now: DateTime<Utc>) -> Vec<Role> {
        use Permission::*;

        vec![
            Role::new(
                SUPER_ADMIN,
                Some("Full administrative access; approves change requests".to_string()),
                [AdminAll].into_iter().collect(),
                now,
            ),
            Role::new(
                USER_ADMIN,
                Some("Manages user accounts; role changes require approval".to_string()),
                [UserCreate, UserRead, UserUpdate, UserRolesRequest, RoleRead]
                    .into_iter()
                    .collect(),
                now,
            ),
            Role::new(
                AUDITOR,
                Some("Read-only access to users and the audit trail".to_string()),
                [UserRead, RoleRead, AuditRead].into_iter().collect(),
                now,
            ),
            Role::new(
                ANALYST,
                Some("Dashboard analytics access".to_string()),
                [AnalyticsRead].into_iter().collect(),
                now,
            ),
        ]
    }
}

/// Role response for API.
#[derive(Debug, Serialize)]
pub struct RoleResponse {
    pub role_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub permissions: PermissionSet,
    pub active: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl From<Role> for RoleResponse {
    fn from(r: Role) -> Self {
        Self {
            role_id: r.role_id,
            name: r.name,
            description: r.description,
            permissions: r.permissions,
            active: r.active,
            created_utc: r.created_utc,
            updated_utc: r.updated_utc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_roles_are_unique_and_super_admin_is_wildcard() {
        let roles = Role::defaults(Utc::now());
        let mut names: Vec<_> = roles.iter().map(|r| r.name.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), roles.len());

        let super_admin = roles.iter().find(|r| r.is_super_admin()).unwrap();
        assert!(super_admin.permissions.contains(Permission::AdminAll));
        assert!(!super_admin.permissions.contains(Permission::UserRolesUpdate));
    }

    #[test]
    fn test_user_admin_can_only_request_role_changes() {
        let roles = Role::defaults(Utc::now());
        let user_admin = roles.iter().find(|r| r.name == USER_ADMIN).unwrap();
        assert!(user_admin.permissions.allows(Permission::UserRolesRequest));
        assert!(!user_admin.permissions.allows(Permission::UserRolesUpdate));
    }
}
