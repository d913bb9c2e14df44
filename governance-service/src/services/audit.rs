//! Audit trail recorder.
//!
//! Builds entries stamped with the acting user and request metadata. Every
//! mutation hands its entries to the store so they land in the same
//! transaction as the change they describe.

use chrono::Duration;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use super::access_guard::{AccessGuard, Actor};
use super::clock::Clock;
use super::error::GovernanceError;
use super::store::GovernanceStore;
use crate::models::{AuditAction, AuditFilter, AuditLogEntry, EntityType, Permission, SUPER_ADMIN};

pub const MAX_PAGE_SIZE: i64 = 200;
pub const DEFAULT_ANOMALY_WINDOW_HOURS: i64 = 24;
const MAX_ANOMALY_WINDOW_HOURS: i64 = 24 * 366;

#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn GovernanceStore>,
    clock: Arc<dyn Clock>,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn GovernanceStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Start an entry for `actor`; `None` records a system action.
    pub fn entry(
        &self,
        actor: Option<&Actor>,
        action: AuditAction,
        entity_type: EntityType,
        entity_id: Uuid,
    ) -> AuditLogEntry {
        let entry = AuditLogEntry::new(action, entity_type, entity_id, self.clock.now());
        match actor {
            Some(actor) => entry.actor(Some(actor.user_id)).meta(&actor.meta),
            None => entry,
        }
    }

    #[instrument(skip(self, actor, filter))]
    pub async fn list(
        &self,
        actor: Option<&Actor>,
        filter: &AuditFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<AuditLogEntry>, i64), GovernanceError> {
        AccessGuard::require_permission(actor, Permission::AuditRead)?;
        self.store
            .list_audit(filter, limit.clamp(1, MAX_PAGE_SIZE), offset.max(0))
            .await
    }

    /// Anomalous entries within the last `window_hours`.
    #[instrument(skip(self, actor))]
    pub async fn list_anomalies(
        &self,
        actor: Option<&Actor>,
        window_hours: Option<i64>,
    ) -> Result<Vec<AuditLogEntry>, GovernanceError> {
        AccessGuard::require_role(actor, SUPER_ADMIN)?;
        let window = window_hours.unwrap_or(DEFAULT_ANOMALY_WINDOW_HOURS);
        if window <= 0 {
            return Err(GovernanceError::ValidationFailed(
                "window_hours must be positive".to_string(),
            ));
        }

        let filter = AuditFilter {
            from_utc: Some(self.clock.now() - Duration::hours(window.min(MAX_ANOMALY_WINDOW_HOURS))),
            anomalous_only: true,
            ..Default::default()
        };
        let (entries, _) = self.store.list_audit(&filter, MAX_PAGE_SIZE, 0).await?;
        Ok(entries)
    }
}
