pub mod access_guard;
pub mod anomaly;
pub mod audit;
pub mod auth;
pub mod bootstrap;
pub mod clock;
pub mod database;
pub mod error;
pub mod governance;
pub mod memory;
pub mod metrics;
pub mod permissions;
pub mod provisioning;
pub mod redis;
pub mod roles;
pub mod sessions;
pub mod store;
pub mod users;

pub use access_guard::{AccessGuard, Actor};
pub use anomaly::{AnomalyScorer, HeuristicRiskScore};
pub use audit::AuditRecorder;
pub use auth::{AuthService, ExternalLogin, LoginSession};
pub use clock::{Clock, FixedClock, SystemClock};
pub use database::Database;
pub use error::GovernanceError;
pub use governance::{GovernanceEngine, RoleUpdateOutcome};
pub use memory::InMemoryStore;
pub use permissions::{EffectivePermissions, PermissionResolver};
pub use provisioning::{ProvisioningGate, ProvisioningOutcome};
pub use redis::{AttemptCounter, MockAttemptCounter, RedisService};
pub use roles::{RoleAdmin, RolePatch};
pub use sessions::SessionRegistry;
pub use store::{GovernanceStore, QuorumGuard, StoreResult};
pub use users::{NewUser, UserAdmin};
