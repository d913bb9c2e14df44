//! Domain models for the governance service.

pub mod audit_log;
pub mod change_request;
pub mod pending_approval;
pub mod permission;
pub mod provisioning_rule;
pub mod role;
pub mod role_assignment;
pub mod session;
pub mod user;

pub use audit_log::{AuditAction, AuditFilter, AuditLogEntry, EntityType, RequestMeta};
pub use change_request::{ChangeAction, ChangeRequest, ChangeType, Resolution, ReviewStatus};
pub use pending_approval::PendingApproval;
pub use permission::{Permission, PermissionSet, UnknownPermission};
pub use provisioning_rule::{ClaimMapping, ExternalClaims, ProvisioningRule};
pub use role::{Role, RoleResponse, ANALYST, AUDITOR, SUPER_ADMIN, USER_ADMIN};
pub use role_assignment::{RoleAssignment, RoleSetReplacement};
pub use session::{Session, SessionInfo};
pub use user::{User, UserFilter, UserPatch, UserResponse};
