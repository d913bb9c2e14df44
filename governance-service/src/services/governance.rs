//! Change governance engine.
//!
//! Decides whether a role-set change applies immediately or is queued for a
//! second SUPER_ADMIN, drives the change request lifecycle and enforces the
//! SUPER_ADMIN quorum on every path that can shrink it.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::access_guard::{AccessGuard, Actor};
use super::anomaly::{ActionFeatures, AnomalyScorer, HeuristicRiskScore};
use super::audit::{AuditRecorder, MAX_PAGE_SIZE};
use super::clock::Clock;
use super::error::GovernanceError;
use super::metrics::{self, outcome};
use super::store::{GovernanceStore, QuorumGuard};
use crate::config::GovernanceSettings;
use crate::models::{
    AuditAction, ChangeAction, ChangeRequest, EntityType, Permission, Resolution, ReviewStatus,
    Role, RoleAssignment, RoleSetReplacement, User, SUPER_ADMIN,
};

/// Result of `update_user_roles`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RoleUpdateOutcome {
    Applied {
        user_id: Uuid,
        role_ids: Vec<Uuid>,
        risk_score: HeuristicRiskScore,
        anomalous: bool,
    },
    Queued {
        change_request: ChangeRequest,
    },
}

fn dedupe(role_ids: &[Uuid]) -> Vec<Uuid> {
    let mut seen = BTreeSet::new();
    role_ids
        .iter()
        .copied()
        .filter(|id| seen.insert(*id))
        .collect()
}

#[derive(Clone)]
pub struct GovernanceEngine {
    store: Arc<dyn GovernanceStore>,
    clock: Arc<dyn Clock>,
    audit: AuditRecorder,
    scorer: AnomalyScorer,
    settings: GovernanceSettings,
}

impl GovernanceEngine {
    pub fn new(
        store: Arc<dyn GovernanceStore>,
        clock: Arc<dyn Clock>,
        audit: AuditRecorder,
        settings: GovernanceSettings,
    ) -> Self {
        Self {
            scorer: AnomalyScorer::new(settings.admin_utc_offset_minutes),
            store,
            clock,
            audit,
            settings,
        }
    }

    pub fn settings(&self) -> &GovernanceSettings {
        &self.settings
    }

    /// Request a replacement of `target_id`'s role set.
    ///
    /// A SUPER_ADMIN applies immediately when the change is flagged as an
    /// emergency or when `user:roles:update` is granted explicitly (the
    /// `admin:*` wildcard alone does not count). Everyone else queues a
    /// change request for a second approver.
    #[instrument(skip(self, actor, role_ids, justification), fields(actor_id = ?actor.map(|a| a.user_id)))]
    pub async fn update_user_roles(
        &self,
        actor: Option<&Actor>,
        target_id: Uuid,
        role_ids: &[Uuid],
        justification: &str,
        emergency: bool,
    ) -> Result<RoleUpdateOutcome, GovernanceError> {
        let actor = AccessGuard::require_any_permission(
            actor,
            &[Permission::UserRolesUpdate, Permission::UserRolesRequest],
        )?;

        let justification = self.validate_justification(justification)?;
        let role_ids = dedupe(role_ids);
        self.load_active_roles(&role_ids).await?;
        let target = self.load_live_user(target_id).await?;
        if target.user_id == actor.user_id {
            return Err(GovernanceError::SelfActionForbidden(
                "cannot change your own roles".to_string(),
            ));
        }

        let now = self.clock.now();
        let previous = self.current_role_ids(target_id, now).await?;
        let risk = self.score_role_change(actor, &previous, &role_ids, now).await?;

        let applies_directly = actor.is_super_admin()
            && (emergency || actor.permissions.holds_directly(Permission::UserRolesUpdate));

        if applies_directly {
            let assignments = self
                .apply_role_set(actor, &target, &previous, &role_ids, &justification, emergency, risk)
                .await?;
            metrics::record_decision(outcome::APPLIED);
            return Ok(RoleUpdateOutcome::Applied {
                user_id: target_id,
                role_ids: assignments.iter().map(|a| a.role_id).collect(),
                risk_score: risk,
                anomalous: risk.is_anomalous(),
            });
        }

        let mut request = ChangeRequest::role_set_update(
            actor.user_id,
            target_id,
            role_ids,
            previous,
            justification,
            emergency,
            now,
            Duration::hours(self.settings.change_request_ttl_hours),
        );
        request.risk_score = risk.value();
        request.anomalous = risk.is_anomalous();

        let entry = self
            .audit
            .entry(
                Some(actor),
                AuditAction::ChangeRequestCreated,
                EntityType::ChangeRequest,
                request.request_id,
            )
            .target(target_id)
            .after(&request)
            .summary(format!("Role change for {} queued for approval", target.email))
            .risk(risk.value(), risk.is_anomalous());

        self.store.create_change_request(&request, &[entry]).await?;
        metrics::record_decision(outcome::QUEUED);
        if request.anomalous {
            metrics::record_anomaly();
            warn!(request_id = %request.request_id, risk = request.risk_score, "Anomalous change request queued");
        }
        info!(request_id = %request.request_id, target_id = %target_id, "Change request queued");

        Ok(RoleUpdateOutcome::Queued {
            change_request: request,
        })
    }

    /// Replace the target's role set in one store transaction, audited with
    /// the before and after role ids.
    #[instrument(skip(self, actor, role_ids, justification), fields(actor_id = %actor.user_id))]
    pub async fn execute_role_update(
        &self,
        actor: &Actor,
        target_id: Uuid,
        role_ids: &[Uuid],
        justification: &str,
    ) -> Result<Vec<RoleAssignment>, GovernanceError> {
        let role_ids = dedupe(role_ids);
        self.load_active_roles(&role_ids).await?;
        let target = self.load_live_user(target_id).await?;
        let now = self.clock.now();
        let previous = self.current_role_ids(target_id, now).await?;
        let risk = self.score_role_change(actor, &previous, &role_ids, now).await?;
        self.apply_role_set(actor, &target, &previous, &role_ids, justification, false, risk)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_role_set(
        &self,
        actor: &Actor,
        target: &User,
        previous: &[Uuid],
        role_ids: &[Uuid],
        justification: &str,
        emergency: bool,
        risk: HeuristicRiskScore,
    ) -> Result<Vec<RoleAssignment>, GovernanceError> {
        let now = self.clock.now();
        let replacement = RoleSetReplacement {
            user_id: target.user_id,
            role_ids: role_ids.to_vec(),
            assigned_by: Some(actor.user_id),
            at: now,
        };
        let summary = if emergency {
            format!("Emergency role update for {}: {}", target.email, justification)
        } else {
            format!("Role update for {}: {}", target.email, justification)
        };
        let entry = self
            .audit
            .entry(Some(actor), AuditAction::RolesUpdated, EntityType::User, target.user_id)
            .target(target.user_id)
            .before(&previous)
            .after(&role_ids)
            .summary(summary)
            .risk(risk.value(), risk.is_anomalous());

        let assignments = self
            .store
            .replace_role_set(&replacement, Some(self.quorum_guard(now)), &[entry])
            .await?;
        if risk.is_anomalous() {
            metrics::record_anomaly();
            warn!(target_id = %target.user_id, risk = risk.value(), emergency, "Anomalous role update applied");
        }
        info!(target_id = %target.user_id, roles = assignments.len(), emergency, "Role set replaced");
        Ok(assignments)
    }

    /// Approve or reject a pending change request.
    #[instrument(skip(self, approver, reason), fields(approver_id = ?approver.map(|a| a.user_id)))]
    pub async fn process_change_request(
        &self,
        approver: Option<&Actor>,
        request_id: Uuid,
        action: ChangeAction,
        reason: Option<String>,
    ) -> Result<ChangeRequest, GovernanceError> {
        let approver = AccessGuard::require_role(approver, SUPER_ADMIN)?;

        let request = self
            .store
            .find_change_request(request_id)
            .await?
            .ok_or_else(|| GovernanceError::not_found("Change request"))?;

        let now = self.clock.now();
        if request.is_stale(now) {
            self.expire_request(&request, now).await?;
            return Err(GovernanceError::RequestNotPending {
                status: ReviewStatus::Expired,
            });
        }
        if request.status.is_terminal() {
            return Err(GovernanceError::RequestNotPending {
                status: request.status,
            });
        }
        if approver.user_id == request.requester_id || approver.user_id == request.target_user_id {
            return Err(GovernanceError::SelfActionForbidden(
                "the requester or target cannot resolve this request".to_string(),
            ));
        }

        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());
        let resolution = Resolution {
            id: request_id,
            status: action.target_status(),
            resolved_by: Some(approver.user_id),
            reason: reason.clone(),
            at: now,
        };

        let resolved = match action {
            ChangeAction::Reject => {
                if reason.is_none() {
                    return Err(GovernanceError::ValidationFailed(
                        "a reason is required to reject a change request".to_string(),
                    ));
                }
                let entry = self
                    .audit
                    .entry(
                        Some(approver),
                        AuditAction::ChangeRequestRejected,
                        EntityType::ChangeRequest,
                        request_id,
                    )
                    .target(request.target_user_id)
                    .before(&request.status)
                    .after(&ReviewStatus::Rejected)
                    .summary(format!(
                        "Change request rejected: {}",
                        reason.as_deref().unwrap_or_default()
                    ));
                let resolved = self
                    .store
                    .resolve_change_request(&resolution, None, None, &[entry])
                    .await?;
                metrics::record_decision(outcome::REJECTED);
                resolved
            }
            ChangeAction::Approve => {
                self.load_active_roles(&request.proposed_role_ids).await?;
                let target = self.load_live_user(request.target_user_id).await?;
                let previous = self.current_role_ids(target.user_id, now).await?;
                let replacement = RoleSetReplacement {
                    user_id: target.user_id,
                    role_ids: request.proposed_role_ids.clone(),
                    assigned_by: Some(approver.user_id),
                    at: now,
                };
                let entry = self
                    .audit
                    .entry(
                        Some(approver),
                        AuditAction::ChangeRequestApproved,
                        EntityType::ChangeRequest,
                        request_id,
                    )
                    .target(target.user_id)
                    .before(&previous)
                    .after(&request.proposed_role_ids)
                    .summary(match &reason {
                        Some(reason) => format!("Change request approved: {}", reason),
                        None => "Change request approved".to_string(),
                    })
                    .risk(request.risk_score, request.anomalous);
                let resolved = self
                    .store
                    .resolve_change_request(
                        &resolution,
                        Some(&replacement),
                        Some(self.quorum_guard(now)),
                        &[entry],
                    )
                    .await?;
                metrics::record_decision(outcome::APPROVED);
                resolved
            }
        };

        info!(request_id = %request_id, status = %resolved.status, "Change request resolved");
        Ok(resolved)
    }

    #[instrument(skip(self, actor))]
    pub async fn list_change_requests(
        &self,
        actor: Option<&Actor>,
        status: Option<ReviewStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ChangeRequest>, i64), GovernanceError> {
        AccessGuard::require_role(actor, SUPER_ADMIN)?;
        self.expire_stale_requests().await?;
        self.store
            .list_change_requests(status, limit.clamp(1, MAX_PAGE_SIZE), offset.max(0))
            .await
    }

    /// Move every pending request past its expiry to `Expired`. Returns how
    /// many were transitioned by this call.
    pub async fn expire_stale_requests(&self) -> Result<usize, GovernanceError> {
        let now = self.clock.now();
        let stale = self.store.list_stale_change_requests(now).await?;
        let mut expired = 0;
        for request in &stale {
            match self.expire_request(request, now).await {
                Ok(()) => expired += 1,
                // Resolved concurrently; nothing left to do.
                Err(GovernanceError::RequestNotPending { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        if expired > 0 {
            info!(expired, "Expired stale change requests");
        }
        Ok(expired)
    }

    async fn expire_request(
        &self,
        request: &ChangeRequest,
        now: DateTime<Utc>,
    ) -> Result<(), GovernanceError> {
        let entry = self
            .audit
            .entry(
                None,
                AuditAction::ChangeRequestExpired,
                EntityType::ChangeRequest,
                request.request_id,
            )
            .target(request.target_user_id)
            .before(&request.status)
            .after(&ReviewStatus::Expired)
            .summary("Change request expired without review");
        self.store
            .resolve_change_request(
                &Resolution::expired(request.request_id, now),
                None,
                None,
                &[entry],
            )
            .await?;
        metrics::record_decision(outcome::EXPIRED);
        Ok(())
    }

    /// Soft delete by default; `hard` purges the row and needs SUPER_ADMIN.
    #[instrument(skip(self, actor), fields(actor_id = ?actor.map(|a| a.user_id)))]
    pub async fn delete_user(
        &self,
        actor: Option<&Actor>,
        target_id: Uuid,
        hard: bool,
    ) -> Result<(), GovernanceError> {
        let actor = AccessGuard::require_permission(actor, Permission::UserDelete)?;
        if actor.user_id == target_id {
            return Err(GovernanceError::SelfActionForbidden(
                "cannot delete your own account".to_string(),
            ));
        }
        if hard {
            AccessGuard::require_role(Some(actor), SUPER_ADMIN)?;
        }

        let target = self
            .store
            .find_user(target_id)
            .await?
            .ok_or_else(|| GovernanceError::not_found("User"))?;
        if !hard && target.is_deleted() {
            return Err(GovernanceError::not_found("User"));
        }

        let now = self.clock.now();
        let quorum = Some(self.quorum_guard(now));
        let risk = self
            .scorer
            .assess(self.store.as_ref(), actor.user_id, ActionFeatures::at(now))
            .await?;

        if hard {
            let entry = self
                .audit
                .entry(Some(actor), AuditAction::UserPurged, EntityType::User, target_id)
                .target(target_id)
                .before(&target)
                .summary(format!("User {} purged", target.email))
                .risk(risk.value(), risk.is_anomalous());
            self.store.purge_user(target_id, quorum, &[entry]).await?;
            warn!(target_id = %target_id, "User purged");
        } else {
            let mut deleted = target.clone();
            deleted.active = false;
            deleted.deleted_utc = Some(now);
            deleted.updated_utc = now;
            let entry = self
                .audit
                .entry(Some(actor), AuditAction::UserDeleted, EntityType::User, target_id)
                .target(target_id)
                .before(&target)
                .after(&deleted)
                .summary(format!("User {} deleted", target.email))
                .risk(risk.value(), risk.is_anomalous());
            self.store
                .soft_delete_user(target_id, now, quorum, &[entry])
                .await?;
            info!(target_id = %target_id, "User soft-deleted");
        }
        if risk.is_anomalous() {
            metrics::record_anomaly();
            warn!(target_id = %target_id, risk = risk.value(), "Anomalous user deletion");
        }
        Ok(())
    }

    fn quorum_guard(&self, at: DateTime<Utc>) -> QuorumGuard {
        QuorumGuard::new(self.settings.super_admin_quorum, at)
    }

    fn validate_justification(&self, justification: &str) -> Result<String, GovernanceError> {
        let trimmed = justification.trim();
        if trimmed.chars().count() < self.settings.min_justification_length {
            return Err(GovernanceError::ValidationFailed(format!(
                "justification must be at least {} characters",
                self.settings.min_justification_length
            )));
        }
        Ok(trimmed.to_string())
    }

    async fn load_active_roles(&self, role_ids: &[Uuid]) -> Result<Vec<Role>, GovernanceError> {
        if role_ids.is_empty() {
            return Err(GovernanceError::ValidationFailed(
                "at least one role is required".to_string(),
            ));
        }
        let mut roles = Vec::with_capacity(role_ids.len());
        for role_id in role_ids {
            match self.store.find_role(*role_id).await? {
                Some(role) if role.active => roles.push(role),
                _ => {
                    return Err(GovernanceError::ValidationFailed(format!(
                        "unknown or inactive role {}",
                        role_id
                    )))
                }
            }
        }
        Ok(roles)
    }

    async fn load_live_user(&self, user_id: Uuid) -> Result<User, GovernanceError> {
        self.store
            .find_user(user_id)
            .await?
            .filter(|u| !u.is_deleted())
            .ok_or_else(|| GovernanceError::not_found("User"))
    }

    async fn current_role_ids(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, GovernanceError> {
        let mut ids: Vec<Uuid> = self
            .store
            .list_assignments(user_id)
            .await?
            .into_iter()
            .filter(|a| a.is_effective(now))
            .map(|a| a.role_id)
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn score_role_change(
        &self,
        actor: &Actor,
        previous: &[Uuid],
        proposed: &[Uuid],
        now: DateTime<Utc>,
    ) -> Result<HeuristicRiskScore, GovernanceError> {
        let features = ActionFeatures::at(now)
            .granting(proposed.iter().any(|id| !previous.contains(id)))
            .touching(proposed.len());
        self.scorer
            .assess(self.store.as_ref(), actor.user_id, features)
            .await
    }
}
