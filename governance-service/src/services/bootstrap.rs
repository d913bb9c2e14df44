//! Startup seeding: built-in roles and the first SUPER_ADMIN account.

use std::sync::Arc;
use tracing::info;

use super::audit::AuditRecorder;
use super::clock::Clock;
use super::error::GovernanceError;
use super::store::GovernanceStore;
use super::users::MIN_PASSWORD_LENGTH;
use crate::config::BootstrapConfig;
use crate::models::{
    user::normalize_email, AuditAction, EntityType, Role, RoleAssignment, User, UserResponse,
    SUPER_ADMIN,
};
use crate::utils::{hash_password, Password};

/// Insert any missing built-in role. Returns how many were created.
pub async fn seed_default_roles(
    store: &Arc<dyn GovernanceStore>,
    clock: &Arc<dyn Clock>,
    audit: &AuditRecorder,
) -> Result<usize, GovernanceError> {
    let mut created = 0;
    for role in Role::defaults(clock.now()) {
        let entry = audit
            .entry(None, AuditAction::RoleCreated, EntityType::Role, role.role_id)
            .after(&role)
            .summary(format!("Built-in role {} seeded", role.name));
        if store.create_role_if_absent(&role, &[entry]).await? {
            info!(role = %role.name, "Seeded built-in role");
            created += 1;
        }
    }
    Ok(created)
}

/// Create the configured SUPER_ADMIN account unless it already exists.
pub async fn seed_admin(
    store: &Arc<dyn GovernanceStore>,
    clock: &Arc<dyn Clock>,
    audit: &AuditRecorder,
    config: &BootstrapConfig,
) -> Result<Option<User>, GovernanceError> {
    let (Some(email), Some(secret)) = (&config.admin_email, &config.admin_password) else {
        return Ok(None);
    };
    let email = normalize_email(email);
    if store.find_user_by_email(&email).await?.is_some() {
        return Ok(None);
    }

    let password = Password::from(secret.clone());
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(GovernanceError::ValidationFailed(format!(
            "bootstrap admin password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    let role = store
        .find_role_by_name(SUPER_ADMIN)
        .await?
        .ok_or_else(|| GovernanceError::not_found("SUPER_ADMIN role"))?;

    let now = clock.now();
    let user = User::new(&email, &email, Some("Administrator".to_string()), now);
    let credential = hash_password(&password)?.into_string();
    let assignment = RoleAssignment::new(user.user_id, role.role_id, None, now);
    let entry = audit
        .entry(None, AuditAction::UserCreated, EntityType::User, user.user_id)
        .target(user.user_id)
        .after(&serde_json::json!({
            "user": UserResponse::from(user.clone()),
            "roles": [SUPER_ADMIN],
        }))
        .summary(format!("Bootstrap administrator {} created", email));

    store
        .create_user(&user, Some(&credential), &[assignment], &[entry])
        .await?;
    info!(user_id = %user.user_id, "Bootstrap administrator created");
    Ok(Some(user))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::SystemClock;
    use crate::services::memory::InMemoryStore;
    use secrecy::SecretString;

    #[tokio::test]
    async fn test_seeding_is_idempotent() {
        let store: Arc<dyn GovernanceStore> = Arc::new(InMemoryStore::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let audit = AuditRecorder::new(store.clone(), clock.clone());
        let config = BootstrapConfig {
            admin_email: Some("Root@Corp.Example".to_string()),
            admin_password: Some(SecretString::new("a-long-enough-secret".to_string())),
        };

        assert_eq!(seed_default_roles(&store, &clock, &audit).await.unwrap(), 4);
        assert_eq!(seed_default_roles(&store, &clock, &audit).await.unwrap(), 0);

        let admin = seed_admin(&store, &clock, &audit, &config).await.unwrap().unwrap();
        assert_eq!(admin.email, "root@corp.example");
        assert!(seed_admin(&store, &clock, &audit, &config).await.unwrap().is_none());
        assert_eq!(store.count_role_holders(SUPER_ADMIN, clock.now()).await.unwrap(), 1);
    }
}
