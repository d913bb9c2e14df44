//! `/admin/pending-approvals`: JIT identities awaiting review.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::dtos::admin::{ResolutionRequest, StatusQuery};
use crate::middleware::AuthUser;
use crate::models::PendingApproval;
use crate::services::GovernanceError;
use crate::AppState;

/// GET /admin/pending-approvals?status
pub async fn list_pending_approvals(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Query(query): Query<StatusQuery>,
) -> Result<Json<Vec<PendingApproval>>, GovernanceError> {
    let approvals = state
        .provisioning
        .list_pending_approvals(Some(&actor), query.status)
        .await?;
    Ok(Json(approvals))
}

/// POST /admin/pending-approvals/:id/approve
pub async fn approve_pending_approval(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(pending_id): Path<Uuid>,
    payload: Option<Json<ResolutionRequest>>,
) -> Result<Json<PendingApproval>, GovernanceError> {
    let Json(body) = payload.unwrap_or_default();
    body.validate()?;
    let approval = state
        .provisioning
        .approve_pending_approval(Some(&actor), pending_id, body.reason)
        .await?;
    Ok(Json(approval))
}

/// POST /admin/pending-approvals/:id/reject
pub async fn reject_pending_approval(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(pending_id): Path<Uuid>,
    payload: Option<Json<ResolutionRequest>>,
) -> Result<Json<PendingApproval>, GovernanceError> {
    let Json(body) = payload.unwrap_or_default();
    body.validate()?;
    let approval = state
        .provisioning
        .reject_pending_approval(Some(&actor), pending_id, body.reason)
        .await?;
    Ok(Json(approval))
}
