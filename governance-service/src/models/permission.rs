//! Closed set of grantable permissions.
//!
//! Permissions travel as stable strings (`user:roles:update`) but are parsed
//! into [`Permission`] at every boundary, so a misspelt grant is rejected
//! instead of silently granting nothing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "user:create")]
    UserCreate,
    #[serde(rename = "user:read")]
    UserRead,
    #[serde(rename = "user:update")]
    UserUpdate,
    #[serde(rename = "user:delete")]
    UserDelete,
    #[serde(rename = "user:roles:update")]
    UserRolesUpdate,
    #[serde(rename = "user:roles:request")]
    UserRolesRequest,
    #[serde(rename = "role:read")]
    RoleRead,
    #[serde(rename = "role:manage")]
    RoleManage,
    #[serde(rename = "admin:audit:read")]
    AuditRead,
    #[serde(rename = "analytics:read")]
    AnalyticsRead,
    /// Wildcard: satisfies every permission check.
    #[serde(rename = "admin:*")]
    AdminAll,
}

impl Permission {
    pub const ALL: [Permission; 11] = [
        Permission::UserCreate,
        Permission::UserRead,
        Permission::UserUpdate,
        Permission::UserDelete,
        Permission::UserRolesUpdate,
        Permission::UserRolesRequest,
        Permission::RoleRead,
        Permission::RoleManage,
        Permission::AuditRead,
        Permission::AnalyticsRead,
        Permission::AdminAll,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::UserCreate => "user:create",
            Permission::UserRead => "user:read",
            Permission::UserUpdate => "user:update",
            Permission::UserDelete => "user:delete",
            Permission::UserRolesUpdate => "user:roles:update",
            Permission::UserRolesRequest => "user:roles:request",
            Permission::RoleRead => "role:read",
            Permission::RoleManage => "role:manage",
            Permission::AuditRead => "admin:audit:read",
            Permission::AnalyticsRead => "analytics:read",
            Permission::AdminAll => "admin:*",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown permission '{0}'")]
pub struct UnknownPermission(pub String);

impl FromStr for Permission {
    type Err = UnknownPermission;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s.trim())
            .ok_or_else(|| UnknownPermission(s.to_string()))
    }
}

/// Ordered set of permissions attached to a role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<Permission>);

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse raw permission strings, failing on the first unknown one.
    pub fn parse<I, S>(raw: I) -> Result<Self, UnknownPermission>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        raw.into_iter()
            .map(|s| s.as_ref().parse::<Permission>())
            .collect::<Result<BTreeSet<_>, _>>()
            .map(Self)
    }

    pub fn contains(&self, permission: Permission) -> bool {
        self.0.contains(&permission)
    }

    /// Whether this set satisfies `permission`, honouring the wildcard.
    pub fn allows(&self, permission: Permission) -> bool {
        self.contains(Permission::AdminAll) || self.contains(permission)
    }

    pub fn insert(&mut self, permission: Permission) {
        self.0.insert(permission);
    }

    pub fn extend(&mut self, other: &PermissionSet) {
        self.0.extend(other.0.iter().copied());
    }

    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// String form for persistence.
    pub fn to_strings(&self) -> Vec<String> {
        self.0.iter().map(|p| p.as_str().to_string()).collect()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<T: IntoIterator<Item = Permission>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl TryFrom<Vec<String>> for PermissionSet {
    type Error = UnknownPermission;

    fn try_from(raw: Vec<String>) -> Result<Self, Self::Error> {
        Self::parse(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trips_every_permission_string() {
        for permission in Permission::ALL {
            assert_eq!(permission.as_str().parse::<Permission>(), Ok(permission));
        }
    }

    #[test]
    fn test_rejects_misspelt_permission() {
        let err = PermissionSet::parse(["user:read", "user:raed"]).unwrap_err();
        assert_eq!(err, UnknownPermission("user:raed".to_string()));
    }

    #[test]
    fn test_wildcard_allows_everything() {
        let set: PermissionSet = [Permission::AdminAll].into_iter().collect();
        for permission in Permission::ALL {
            assert!(set.allows(permission));
        }
        assert!(!set.contains(Permission::UserRolesUpdate));
    }

    #[test]
    fn test_serializes_as_strings() {
        let set: PermissionSet = [Permission::UserRead, Permission::AuditRead]
            .into_iter()
            .collect();
        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(json, serde_json::json!(["user:read", "admin:audit:read"]));
    }
}
