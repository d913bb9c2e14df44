//! Session registry: opaque bearer tokens backed by stored digests.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Duration;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use super::access_guard::{AccessGuard, Actor};
use super::audit::AuditRecorder;
use super::clock::Clock;
use super::error::GovernanceError;
use super::store::GovernanceStore;
use crate::models::{AuditAction, EntityType, Permission, RequestMeta, Session, SessionInfo, User};

const TOKEN_BYTES: usize = 32;

/// Generate a fresh bearer token and its storage digest.
pub fn issue_token() -> (String, String) {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    let token = URL_SAFE_NO_PAD.encode(bytes);
    let digest = hash_token(&token);
    (token, digest)
}

/// Hex SHA-256 of a bearer token; only this digest is persisted.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[derive(Clone)]
pub struct SessionRegistry {
    store: Arc<dyn GovernanceStore>,
    clock: Arc<dyn Clock>,
    audit: AuditRecorder,
    ttl: Duration,
}

impl SessionRegistry {
    pub fn new(
        store: Arc<dyn GovernanceStore>,
        clock: Arc<dyn Clock>,
        audit: AuditRecorder,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            audit,
            ttl,
        }
    }

    /// Open a session for `user`, returning it with the plaintext token.
    #[instrument(skip(self, user, meta), fields(user_id = %user.user_id))]
    pub async fn create_session(
        &self,
        user: &User,
        meta: &RequestMeta,
    ) -> Result<(Session, String), GovernanceError> {
        let now = self.clock.now();
        let (token, token_hash) = issue_token();
        let session = Session {
            session_id: Uuid::new_v4(),
            user_id: user.user_id,
            token_hash,
            ip_address: meta.ip_address.clone(),
            user_agent: meta.user_agent.clone(),
            active: true,
            created_utc: now,
            expires_utc: now + self.ttl,
            last_activity_utc: now,
        };

        let entry = self
            .audit
            .entry(None, AuditAction::SessionCreated, EntityType::Session, session.session_id)
            .actor(Some(user.user_id))
            .target(user.user_id)
            .meta(&RequestMeta {
                session_id: Some(session.session_id),
                ..meta.clone()
            })
            .summary(format!("Session opened for {}", user.email));

        self.store.create_session(&session, &[entry]).await?;
        tracing::info!(session_id = %session.session_id, "Session created");
        Ok((session, token))
    }

    /// Resolve a bearer token to its live session.
    pub async fn authenticate(&self, token: &str) -> Result<Session, GovernanceError> {
        let now = self.clock.now();
        let session = self
            .store
            .find_session_by_token(&hash_token(token))
            .await?
            .filter(|s| s.is_live(now))
            .ok_or(GovernanceError::Unauthorized)?;

        self.store.touch_session(session.session_id, now).await?;
        Ok(session)
    }

    #[instrument(skip(self, actor))]
    pub async fn list_active(
        &self,
        actor: Option<&Actor>,
        user_id: Uuid,
    ) -> Result<Vec<SessionInfo>, GovernanceError> {
        let actor = AccessGuard::require_permission(actor, Permission::UserRead)?;
        let now = self.clock.now();
        Ok(self
            .store
            .list_sessions(user_id)
            .await?
            .into_iter()
            .filter(|s| s.is_live(now))
            .map(|s| SessionInfo::from_session(s, actor.session_id))
            .collect())
    }

    /// Administratively end another session.
    #[instrument(skip(self, actor))]
    pub async fn revoke(
        &self,
        actor: Option<&Actor>,
        session_id: Uuid,
    ) -> Result<(), GovernanceError> {
        let actor = AccessGuard::require_permission(actor, Permission::UserUpdate)?;
        if actor.session_id == Some(session_id) {
            return Err(GovernanceError::SelfActionForbidden(
                "use logout to end your current session".to_string(),
            ));
        }

        let now = self.clock.now();
        let session = self
            .store
            .find_session(session_id)
            .await?
            .filter(|s| s.is_live(now))
            .ok_or_else(|| GovernanceError::not_found("Session"))?;

        let entry = self
            .audit
            .entry(Some(actor), AuditAction::SessionRevoked, EntityType::Session, session_id)
            .target(session.user_id)
            .summary("Session revoked by administrator");

        if !self.store.deactivate_session(session_id, &[entry]).await? {
            return Err(GovernanceError::not_found("Session"));
        }
        tracing::info!(session_id = %session_id, revoked_by = %actor.user_id, "Session revoked");
        Ok(())
    }

    /// End the caller's own session. A session that already ended is
    /// reported as `Unauthorized`.
    pub async fn logout(&self, actor: Option<&Actor>) -> Result<(), GovernanceError> {
        let actor = AccessGuard::authenticated(actor)?;
        let session_id = actor.session_id.ok_or(GovernanceError::Unauthorized)?;

        let entry = self
            .audit
            .entry(Some(actor), AuditAction::SessionEnded, EntityType::Session, session_id)
            .target(actor.user_id)
            .summary("Logged out");
        if !self.store.deactivate_session(session_id, &[entry]).await? {
            return Err(GovernanceError::Unauthorized);
        }
        tracing::info!(session_id = %session_id, "Logged out");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_unique_and_digest_matches() {
        let (a, a_hash) = issue_token();
        let (b, _) = issue_token();
        assert_ne!(a, b);
        assert_eq!(hash_token(&a), a_hash);
        assert_eq!(a_hash.len(), 64);
        // 32 bytes, unpadded URL-safe base64
        assert_eq!(a.len(), 43);
        assert!(!a.contains('+') && !a.contains('/'));
    }
}
