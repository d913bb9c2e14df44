//! Just-in-time provisioning of externally authenticated identities.
//!
//! Rules are static configuration: matched by provider, then exact email
//! domain, then the provider's `*` fallback. A rule either provisions an
//! active user straight away or parks an inactive one behind a pending
//! approval that a SUPER_ADMIN resolves.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::access_guard::{AccessGuard, Actor};
use super::audit::AuditRecorder;
use super::clock::Clock;
use super::error::GovernanceError;
use super::metrics::{self, outcome};
use super::store::GovernanceStore;
use crate::models::{
    user::{email_domain, normalize_email},
    AuditAction, EntityType, ExternalClaims, PendingApproval, ProvisioningRule, Resolution,
    ReviewStatus, RoleAssignment, User, SUPER_ADMIN,
};

/// Read provisioning rules from a JSON array file.
pub fn load_rules(path: impl AsRef<Path>) -> Result<Vec<ProvisioningRule>, anyhow::Error> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
    let rules: Vec<ProvisioningRule> = serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("Invalid provisioning rules in {}: {}", path.display(), e))?;
    Ok(rules)
}

#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProvisioningOutcome {
    /// A user with this email already existed and was left untouched.
    Existing { user: User },
    Provisioned { user: User, roles: Vec<String> },
    PendingApproval { approval: PendingApproval },
}

impl ProvisioningOutcome {
    pub fn user_id(&self) -> Uuid {
        match self {
            ProvisioningOutcome::Existing { user } | ProvisioningOutcome::Provisioned { user, .. } => {
                user.user_id
            }
            ProvisioningOutcome::PendingApproval { approval } => approval.user_id,
        }
    }
}

#[derive(Clone)]
pub struct ProvisioningGate {
    store: Arc<dyn GovernanceStore>,
    clock: Arc<dyn Clock>,
    audit: AuditRecorder,
    rules: Arc<Vec<ProvisioningRule>>,
    pending_ttl: Duration,
}

impl ProvisioningGate {
    pub fn new(
        store: Arc<dyn GovernanceStore>,
        clock: Arc<dyn Clock>,
        audit: AuditRecorder,
        rules: Vec<ProvisioningRule>,
        pending_ttl: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            audit,
            rules: Arc::new(rules),
            pending_ttl,
        }
    }

    pub fn rules(&self) -> &[ProvisioningRule] {
        &self.rules
    }

    /// Exact domain match first, then the provider's wildcard rule.
    pub fn find_rule(&self, provider: &str, domain: &str) -> Option<&ProvisioningRule> {
        let candidates = || self.rules.iter().filter(|r| r.applies_to_provider(provider));
        candidates()
            .find(|r| !r.is_wildcard() && r.domain.eq_ignore_ascii_case(domain))
            .or_else(|| candidates().find(|r| r.is_wildcard()))
    }

    #[instrument(skip(self, claims), fields(email = %claims.email))]
    pub async fn provision_external_user(
        &self,
        claims: &ExternalClaims,
        provider: &str,
    ) -> Result<ProvisioningOutcome, GovernanceError> {
        let email = normalize_email(&claims.email);
        let domain = email_domain(&email)
            .ok_or_else(|| {
                GovernanceError::ValidationFailed("external identity has no email domain".to_string())
            })?
            .to_string();

        let rule = self.find_rule(provider, &domain).ok_or_else(|| {
            warn!(provider, domain = %domain, "No provisioning rule matched");
            GovernanceError::NoProvisioningRule {
                provider: provider.to_string(),
                domain: domain.clone(),
            }
        })?;

        if let Some(existing) = self.store.find_user_by_email(&email).await? {
            return Ok(ProvisioningOutcome::Existing { user: existing });
        }

        let mut role_ids = Vec::new();
        let mut role_names = Vec::new();
        for name in rule.role_names_for(claims) {
            match self.store.find_role_by_name(&name).await? {
                Some(role) if role.active => {
                    role_ids.push(role.role_id);
                    role_names.push(role.name);
                }
                _ => warn!(role = %name, provider, "Provisioning rule names an unknown role; skipped"),
            }
        }

        let now = self.clock.now();
        let mut user = User::new(&email, &email, claims.name.clone(), now);
        user.external = true;
        let claims_json = serde_json::to_value(claims).map_err(anyhow::Error::from)?;

        if rule.requires_approval {
            user.active = false;
            let approval = PendingApproval::new(
                provider,
                &email,
                user.user_id,
                claims_json,
                role_ids,
                now,
                self.pending_ttl,
            );
            let entry = self
                .audit
                .entry(
                    None,
                    AuditAction::PendingApprovalCreated,
                    EntityType::PendingApproval,
                    approval.pending_id,
                )
                .target(user.user_id)
                .after(&approval)
                .summary(format!("External identity {} awaits approval", email));
            self.store
                .create_pending_approval(&user, &approval, &[entry])
                .await?;
            metrics::record_decision(outcome::PROVISION_PENDING);
            info!(pending_id = %approval.pending_id, provider, "External identity parked for approval");
            return Ok(ProvisioningOutcome::PendingApproval { approval });
        }

        let assignments: Vec<RoleAssignment> = role_ids
            .iter()
            .map(|role_id| RoleAssignment::new(user.user_id, *role_id, None, now))
            .collect();
        let entry = self
            .audit
            .entry(None, AuditAction::UserProvisioned, EntityType::User, user.user_id)
            .target(user.user_id)
            .after(&serde_json::json!({ "user": &user, "roles": &role_names, "provider": provider }))
            .summary(format!("External identity {} provisioned", email));
        self.store
            .create_user(&user, None, &assignments, &[entry])
            .await?;
        metrics::record_decision(outcome::PROVISIONED);
        info!(user_id = %user.user_id, provider, roles = role_names.len(), "External identity provisioned");

        Ok(ProvisioningOutcome::Provisioned {
            user,
            roles: role_names,
        })
    }

    pub async fn list_pending_approvals(
        &self,
        actor: Option<&Actor>,
        status: Option<ReviewStatus>,
    ) -> Result<Vec<PendingApproval>, GovernanceError> {
        AccessGuard::require_role(actor, SUPER_ADMIN)?;
        self.expire_stale_approvals().await?;
        self.store.list_pending_approvals(status).await
    }

    /// Activate the parked user and grant the stored roles.
    #[instrument(skip(self, actor, reason))]
    pub async fn approve_pending_approval(
        &self,
        actor: Option<&Actor>,
        pending_id: Uuid,
        reason: Option<String>,
    ) -> Result<PendingApproval, GovernanceError> {
        let actor = AccessGuard::require_role(actor, SUPER_ADMIN)?;
        let approval = self.load_open_approval(pending_id).await?;
        let reason = reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());

        let entry = self
            .audit
            .entry(
                Some(actor),
                AuditAction::PendingApprovalApproved,
                EntityType::PendingApproval,
                pending_id,
            )
            .target(approval.user_id)
            .after(&approval.role_ids)
            .summary(format!("External identity {} approved", approval.email));
        let resolution = Resolution {
            id: pending_id,
            status: ReviewStatus::Approved,
            resolved_by: Some(actor.user_id),
            reason,
            at: self.clock.now(),
        };
        let resolved = self
            .store
            .resolve_pending_approval(&resolution, &[entry])
            .await?;
        metrics::record_decision(outcome::APPROVED);
        info!(pending_id = %pending_id, user_id = %resolved.user_id, "Pending approval granted");
        Ok(resolved)
    }

    #[instrument(skip(self, actor, reason))]
    pub async fn reject_pending_approval(
        &self,
        actor: Option<&Actor>,
        pending_id: Uuid,
        reason: Option<String>,
    ) -> Result<PendingApproval, GovernanceError> {
        let actor = AccessGuard::require_role(actor, SUPER_ADMIN)?;
        let approval = self.load_open_approval(pending_id).await?;
        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .ok_or_else(|| {
                GovernanceError::ValidationFailed(
                    "a reason is required to reject a pending approval".to_string(),
                )
            })?;

        let entry = self
            .audit
            .entry(
                Some(actor),
                AuditAction::PendingApprovalRejected,
                EntityType::PendingApproval,
                pending_id,
            )
            .target(approval.user_id)
            .summary(format!(
                "External identity {} rejected: {}",
                approval.email, reason
            ));
        let resolution = Resolution {
            id: pending_id,
            status: ReviewStatus::Rejected,
            resolved_by: Some(actor.user_id),
            reason: Some(reason),
            at: self.clock.now(),
        };
        let resolved = self
            .store
            .resolve_pending_approval(&resolution, &[entry])
            .await?;
        metrics::record_decision(outcome::REJECTED);
        Ok(resolved)
    }

    /// Expire every pending approval past its deadline.
    pub async fn expire_stale_approvals(&self) -> Result<usize, GovernanceError> {
        let now = self.clock.now();
        let stale: Vec<PendingApproval> = self
            .store
            .list_pending_approvals(Some(ReviewStatus::Pending))
            .await?
            .into_iter()
            .filter(|p| p.is_stale(now))
            .collect();

        let mut expired = 0;
        for approval in &stale {
            match self.expire_approval(approval, now).await {
                Ok(()) => expired += 1,
                Err(GovernanceError::RequestNotPending { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        if expired > 0 {
            info!(expired, "Expired stale pending approvals");
        }
        Ok(expired)
    }

    async fn load_open_approval(&self, pending_id: Uuid) -> Result<PendingApproval, GovernanceError> {
        let approval = self
            .store
            .find_pending_approval(pending_id)
            .await?
            .ok_or_else(|| GovernanceError::not_found("Pending approval"))?;

        let now = self.clock.now();
        if approval.is_stale(now) {
            self.expire_approval(&approval, now).await?;
            return Err(GovernanceError::RequestNotPending {
                status: ReviewStatus::Expired,
            });
        }
        if approval.status.is_terminal() {
            return Err(GovernanceError::RequestNotPending {
                status: approval.status,
            });
        }
        Ok(approval)
    }

    async fn expire_approval(
        &self,
        approval: &PendingApproval,
        now: DateTime<Utc>,
    ) -> Result<(), GovernanceError> {
        let entry = self
            .audit
            .entry(
                None,
                AuditAction::PendingApprovalExpired,
                EntityType::PendingApproval,
                approval.pending_id,
            )
            .target(approval.user_id)
            .summary("Pending approval expired without review");
        self.store
            .resolve_pending_approval(&Resolution::expired(approval.pending_id, now), &[entry])
            .await?;
        metrics::record_decision(outcome::EXPIRED);
        Ok(())
    }
}
