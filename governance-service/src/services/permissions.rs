//! Permission resolution over effective role assignments.

use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

use super::clock::Clock;
use super::error::GovernanceError;
use super::store::GovernanceStore;
use crate::models::{Permission, PermissionSet, Role, SUPER_ADMIN};

/// Union of permissions granted by a user's effective roles, resolved once
/// per request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EffectivePermissions {
    pub permissions: PermissionSet,
    pub roles: BTreeSet<String>,
}

impl EffectivePermissions {
    pub fn from_roles<'a>(roles: impl IntoIterator<Item = &'a Role>) -> Self {
        let mut effective = Self::default();
        for role in roles.into_iter().filter(|r| r.active) {
            effective.permissions.extend(&role.permissions);
            effective.roles.insert(role.name.clone());
        }
        effective
    }

    /// Satisfied directly or through `admin:*`.
    pub fn allows(&self, permission: Permission) -> bool {
        self.permissions.allows(permission)
    }

    /// Explicitly granted; the wildcard does not count.
    pub fn holds_directly(&self, permission: Permission) -> bool {
        self.permissions.contains(permission)
    }

    pub fn has_role(&self, name: &str) -> bool {
        self.roles.contains(name)
    }

    pub fn is_super_admin(&self) -> bool {
        self.has_role(SUPER_ADMIN)
    }
}

#[derive(Clone)]
pub struct PermissionResolver {
    store: Arc<dyn GovernanceStore>,
    clock: Arc<dyn Clock>,
}

impl PermissionResolver {
    pub fn new(store: Arc<dyn GovernanceStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn effective_permissions(
        &self,
        user_id: Uuid,
    ) -> Result<EffectivePermissions, GovernanceError> {
        let roles = self
            .store
            .effective_roles(user_id, self.clock.now())
            .await?;
        Ok(EffectivePermissions::from_roles(&roles))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_union_skips_inactive_roles() {
        let now = Utc::now();
        let reader = Role::new("READER", None, [Permission::UserRead].into_iter().collect(), now);
        let mut retired = Role::new(
            "RETIRED",
            None,
            [Permission::UserDelete].into_iter().collect(),
            now,
        );
        retired.active = false;

        let effective = EffectivePermissions::from_roles([&reader, &retired]);
        assert!(effective.allows(Permission::UserRead));
        assert!(!effective.allows(Permission::UserDelete));
        assert!(!effective.has_role("RETIRED"));
    }

    #[test]
    fn test_wildcard_is_not_direct() {
        let now = Utc::now();
        let super_admin = Role::new(
            SUPER_ADMIN,
            None,
            [Permission::AdminAll].into_iter().collect(),
            now,
        );
        let effective = EffectivePermissions::from_roles([&super_admin]);
        assert!(effective.is_super_admin());
        assert!(effective.allows(Permission::UserRolesUpdate));
        assert!(!effective.holds_directly(Permission::UserRolesUpdate));
    }
}
