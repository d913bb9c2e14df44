//! Request bodies and query strings of the `/admin` API.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use super::default_limit;
use crate::models::{AuditAction, AuditFilter, EntityType, ReviewStatus, UserFilter, UserPatch};
use crate::services::{NewUser, RolePatch};
use crate::utils::Password;

// ============================================================================
// Users
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, max = 64, message = "Username must be 1-64 characters"))]
    pub username: String,

    #[validate(length(max = 128))]
    pub display_name: Option<String>,

    #[validate(length(min = 12, message = "Password must be at least 12 characters"))]
    pub password: Option<String>,

    #[serde(default)]
    pub roles: Vec<String>,
}

impl From<CreateUserRequest> for NewUser {
    fn from(req: CreateUserRequest) -> Self {
        NewUser {
            email: req.email,
            username: req.username,
            display_name: req.display_name,
            password: req.password.map(|p| Password::from(SecretString::new(p))),
            role_names: req.roles,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,

    #[validate(length(min = 1, max = 64))]
    pub username: Option<String>,

    #[validate(length(max = 128))]
    pub display_name: Option<String>,

    pub active: Option<bool>,
    pub suspended: Option<bool>,
}

impl From<UpdateUserRequest> for UserPatch {
    fn from(req: UpdateUserRequest) -> Self {
        UserPatch {
            email: req.email,
            username: req.username,
            display_name: req.display_name,
            active: req.active,
            suspended: req.suspended,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    pub search: Option<String>,
    pub active: Option<bool>,
    #[serde(default)]
    pub include_deleted: bool,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

impl ListUsersQuery {
    pub fn filter(&self) -> UserFilter {
        UserFilter {
            search: self.search.clone().filter(|s| !s.trim().is_empty()),
            active: self.active,
            include_deleted: self.include_deleted,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DeleteUserQuery {
    #[serde(default)]
    pub hard: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateUserRolesRequest {
    pub role_ids: Vec<Uuid>,

    #[validate(length(min = 1, max = 2000, message = "Justification is required"))]
    pub justification: String,

    #[serde(default)]
    pub emergency: bool,
}

// ============================================================================
// Change requests and pending approvals
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListChangeRequestsQuery {
    pub status: Option<ReviewStatus>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub status: Option<ReviewStatus>,
}

/// Body of approve/reject calls; reject requires `reason`.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct ResolutionRequest {
    #[validate(length(max = 2000))]
    pub reason: Option<String>,
}

// ============================================================================
// Audit
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub actor_id: Option<Uuid>,
    pub target_id: Option<Uuid>,
    pub action: Option<AuditAction>,
    pub entity_type: Option<EntityType>,
    pub entity_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub anomalous_only: bool,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

impl AuditQuery {
    pub fn filter(&self) -> AuditFilter {
        AuditFilter {
            actor_id: self.actor_id,
            target_id: self.target_id,
            action: self.action,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            from_utc: self.from,
            to_utc: self.to,
            anomalous_only: self.anomalous_only,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AnomaliesQuery {
    pub window_hours: Option<i64>,
}

// ============================================================================
// Roles
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreateRoleRequest {
    #[validate(length(min = 1, max = 64, message = "Role name must be 1-64 characters"))]
    pub name: String,

    #[validate(length(max = 512))]
    pub description: Option<String>,

    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateRoleRequest {
    #[validate(length(max = 512))]
    pub description: Option<String>,
    pub permissions: Option<Vec<String>>,
    pub active: Option<bool>,
}

impl From<UpdateRoleRequest> for RolePatch {
    fn from(req: UpdateRoleRequest) -> Self {
        RolePatch {
            description: req.description,
            permissions: req.permissions,
            active: req.active,
        }
    }
}
