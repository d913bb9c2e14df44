//! Authentication: password login with lockout, external login and bearer
//! token resolution.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::access_guard::Actor;
use super::audit::AuditRecorder;
use super::clock::Clock;
use super::error::GovernanceError;
use super::permissions::PermissionResolver;
use super::provisioning::{ProvisioningGate, ProvisioningOutcome};
use super::redis::{login_failure_key, AttemptCounter};
use super::sessions::SessionRegistry;
use super::store::GovernanceStore;
use crate::config::LockoutConfig;
use crate::models::{
    user::normalize_email, AuditAction, EntityType, ExternalClaims, PendingApproval, RequestMeta,
    User, UserResponse,
};
use crate::utils::{verify_password, Password, PasswordHashString};

/// Issued on successful login. The token is only ever returned here.
#[derive(Debug, Serialize)]
pub struct LoginSession {
    pub token: String,
    pub session_id: Uuid,
    pub expires_utc: DateTime<Utc>,
    pub user: UserResponse,
}

#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExternalLogin {
    Authenticated(LoginSession),
    PendingApproval { approval: PendingApproval },
}

#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn GovernanceStore>,
    clock: Arc<dyn Clock>,
    audit: AuditRecorder,
    sessions: SessionRegistry,
    resolver: PermissionResolver,
    provisioning: ProvisioningGate,
    attempts: Arc<dyn AttemptCounter>,
    lockout: LockoutConfig,
}

impl AuthService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn GovernanceStore>,
        clock: Arc<dyn Clock>,
        audit: AuditRecorder,
        sessions: SessionRegistry,
        resolver: PermissionResolver,
        provisioning: ProvisioningGate,
        attempts: Arc<dyn AttemptCounter>,
        lockout: LockoutConfig,
    ) -> Self {
        Self {
            store,
            clock,
            audit,
            sessions,
            resolver,
            provisioning,
            attempts,
            lockout,
        }
    }

    fn lockout_duration(&self) -> Duration {
        Duration::minutes(self.lockout.duration_minutes)
    }

    #[instrument(skip(self, password, meta))]
    pub async fn login(
        &self,
        email: &str,
        password: &Password,
        meta: &RequestMeta,
    ) -> Result<LoginSession, GovernanceError> {
        let email = normalize_email(email);
        let now = self.clock.now();

        let user = match self.store.find_user_by_email(&email).await? {
            Some(user) if !user.is_deleted() => user,
            _ => {
                warn!("Login attempt for unknown account");
                return Err(GovernanceError::InvalidCredentials);
            }
        };

        if let Some(until) = user.locked_until.filter(|_| user.is_locked(now)) {
            return Err(GovernanceError::AccountLocked { until });
        }

        let verified = match self.store.find_credential(user.user_id).await? {
            Some(hash) => verify_password(password, &PasswordHashString::new(hash)).is_ok(),
            None => false,
        };
        if !verified {
            return Err(self.register_failure(user, now).await?);
        }

        if !user.can_authenticate() {
            return Err(GovernanceError::AccountInactive);
        }

        self.attempts
            .reset(&login_failure_key(&email))
            .await
            .map_err(GovernanceError::Internal)?;
        let user = self.clear_failures(user, now).await?;
        self.open_session(user, meta).await
    }

    /// Count a failed password attempt; lock the account once the
    /// threshold is reached. Returns the error to report.
    async fn register_failure(
        &self,
        mut user: User,
        now: DateTime<Utc>,
    ) -> Result<GovernanceError, GovernanceError> {
        let key = login_failure_key(&user.email);
        let window = u64::try_from(self.lockout_duration().num_seconds()).unwrap_or(0);
        let failures = self
            .attempts
            .record_failure(&key, window)
            .await
            .map_err(GovernanceError::Internal)?;

        let previous_failures = user.failed_attempts;
        user.failed_attempts = i32::try_from(failures).unwrap_or(i32::MAX);
        user.updated_utc = now;

        if failures < u64::from(self.lockout.max_failed_attempts) {
            warn!(user_id = %user.user_id, failures, "Invalid password");
            let entry = self
                .audit
                .entry(None, AuditAction::LoginFailed, EntityType::User, user.user_id)
                .target(user.user_id)
                .before(&serde_json::json!({ "failed_attempts": previous_failures }))
                .after(&serde_json::json!({ "failed_attempts": user.failed_attempts }))
                .summary(format!("Failed login for {}", user.email));
            self.store.update_user(&user, None, &[entry]).await?;
            return Ok(GovernanceError::InvalidCredentials);
        }

        let until = now + self.lockout_duration();
        user.locked_until = Some(until);
        user.failed_attempts = 0;
        let entry = self
            .audit
            .entry(None, AuditAction::UserLocked, EntityType::User, user.user_id)
            .target(user.user_id)
            .before(&serde_json::json!({ "failed_attempts": previous_failures }))
            .after(&serde_json::json!({ "locked_until": until, "failures": failures }))
            .summary(format!("Account {} locked after {} failed logins", user.email, failures));
        self.store.update_user(&user, None, &[entry]).await?;
        self.attempts
            .reset(&key)
            .await
            .map_err(GovernanceError::Internal)?;

        warn!(user_id = %user.user_id, until = %until, "Account locked");
        Ok(GovernanceError::AccountLocked { until })
    }

    async fn clear_failures(&self, mut user: User, now: DateTime<Utc>) -> Result<User, GovernanceError> {
        if user.failed_attempts == 0 && user.locked_until.is_none() {
            return Ok(user);
        }
        let entry = self
            .audit
            .entry(None, AuditAction::LockoutCleared, EntityType::User, user.user_id)
            .target(user.user_id)
            .before(&serde_json::json!({
                "failed_attempts": user.failed_attempts,
                "locked_until": user.locked_until,
            }))
            .after(&serde_json::json!({ "failed_attempts": 0, "locked_until": null }))
            .summary(format!("Failed login count cleared for {}", user.email));
        user.failed_attempts = 0;
        user.locked_until = None;
        user.updated_utc = now;
        self.store.update_user(&user, None, &[entry]).await?;
        Ok(user)
    }

    async fn open_session(
        &self,
        mut user: User,
        meta: &RequestMeta,
    ) -> Result<LoginSession, GovernanceError> {
        let (session, token) = self.sessions.create_session(&user, meta).await?;
        user.last_login_utc = Some(session.created_utc);
        info!(user_id = %user.user_id, session_id = %session.session_id, "Login succeeded");
        Ok(LoginSession {
            token,
            session_id: session.session_id,
            expires_utc: session.expires_utc,
            user: user.into(),
        })
    }

    /// Sign in an identity asserted by an external provider, provisioning
    /// it on first sight.
    #[instrument(skip(self, claims, meta), fields(email = %claims.email))]
    pub async fn login_external(
        &self,
        claims: &ExternalClaims,
        provider: &str,
        meta: &RequestMeta,
    ) -> Result<ExternalLogin, GovernanceError> {
        let user = match self
            .provisioning
            .provision_external_user(claims, provider)
            .await?
        {
            ProvisioningOutcome::PendingApproval { approval } => {
                return Ok(ExternalLogin::PendingApproval { approval })
            }
            ProvisioningOutcome::Existing { user } | ProvisioningOutcome::Provisioned { user, .. } => {
                user
            }
        };

        if user.is_locked(self.clock.now()) {
            if let Some(until) = user.locked_until {
                return Err(GovernanceError::AccountLocked { until });
            }
        }
        if !user.can_authenticate() {
            return Err(GovernanceError::AccountInactive);
        }
        Ok(ExternalLogin::Authenticated(
            self.open_session(user, meta).await?,
        ))
    }

    /// Resolve a bearer token into the acting user with fresh permissions.
    pub async fn authenticate_bearer(
        &self,
        token: &str,
        meta: &RequestMeta,
    ) -> Result<Actor, GovernanceError> {
        let session = self.sessions.authenticate(token).await?;
        let user = self
            .store
            .find_user(session.user_id)
            .await?
            .filter(User::can_authenticate)
            .ok_or(GovernanceError::Unauthorized)?;
        let permissions = self.resolver.effective_permissions(user.user_id).await?;

        Ok(Actor {
            user_id: user.user_id,
            email: user.email,
            session_id: Some(session.session_id),
            permissions,
            meta: RequestMeta {
                session_id: Some(session.session_id),
                ..meta.clone()
            },
        })
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }
}
