//! Audit trail queries.

use axum::{
    extract::{Query, State},
    Json,
};

use crate::dtos::admin::{AnomaliesQuery, AuditQuery};
use crate::dtos::Page;
use crate::middleware::AuthUser;
use crate::models::AuditLogEntry;
use crate::services::GovernanceError;
use crate::AppState;

/// GET /admin/audit
#[tracing::instrument(
    skip(state, actor),
    fields(action = ?query.action, limit = query.limit, offset = query.offset)
)]
pub async fn list_audit_log(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Page<AuditLogEntry>>, GovernanceError> {
    let (items, total) = state
        .audit
        .list(Some(&actor), &query.filter(), query.limit, query.offset)
        .await?;
    Ok(Json(Page {
        items,
        total,
        limit: query.limit,
        offset: query.offset,
    }))
}

/// GET /admin/anomalies?window_hours
pub async fn list_anomalies(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Query(query): Query<AnomaliesQuery>,
) -> Result<Json<Vec<AuditLogEntry>>, GovernanceError> {
    let entries = state
        .audit
        .list_anomalies(Some(&actor), query.window_hours)
        .await?;
    Ok(Json(entries))
}
