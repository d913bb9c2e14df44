//! `/admin/change-requests`.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::dtos::admin::{ListChangeRequestsQuery, ResolutionRequest};
use crate::dtos::Page;
use crate::middleware::AuthUser;
use crate::models::{ChangeAction, ChangeRequest};
use crate::services::GovernanceError;
use crate::AppState;

/// GET /admin/change-requests?status
pub async fn list_change_requests(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Query(query): Query<ListChangeRequestsQuery>,
) -> Result<Json<Page<ChangeRequest>>, GovernanceError> {
    let (items, total) = state
        .governance
        .list_change_requests(Some(&actor), query.status, query.limit, query.offset)
        .await?;
    Ok(Json(Page {
        items,
        total,
        limit: query.limit,
        offset: query.offset,
    }))
}

/// POST /admin/change-requests/:id/approve
pub async fn approve_change_request(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(request_id): Path<Uuid>,
    payload: Option<Json<ResolutionRequest>>,
) -> Result<Json<ChangeRequest>, GovernanceError> {
    resolve(state, actor, request_id, ChangeAction::Approve, payload).await
}

/// POST /admin/change-requests/:id/reject
pub async fn reject_change_request(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(request_id): Path<Uuid>,
    payload: Option<Json<ResolutionRequest>>,
) -> Result<Json<ChangeRequest>, GovernanceError> {
    resolve(state, actor, request_id, ChangeAction::Reject, payload).await
}

async fn resolve(
    state: AppState,
    actor: crate::services::Actor,
    request_id: Uuid,
    action: ChangeAction,
    payload: Option<Json<ResolutionRequest>>,
) -> Result<Json<ChangeRequest>, GovernanceError> {
    let Json(body) = payload.unwrap_or_default();
    body.validate()?;
    let request = state
        .governance
        .process_change_request(Some(&actor), request_id, action, body.reason)
        .await?;
    Ok(Json(request))
}
