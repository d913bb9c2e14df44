//! `/admin/users` and `/users/me`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::dtos::admin::{
    CreateUserRequest, DeleteUserQuery, ListUsersQuery, UpdateUserRequest, UpdateUserRolesRequest,
};
use crate::dtos::Page;
use crate::middleware::AuthUser;
use crate::models::{SessionInfo, UserResponse};
use crate::services::users::{Profile, UserWithRoles};
use crate::services::{GovernanceError, RoleUpdateOutcome};
use crate::AppState;

/// POST /admin/users
pub async fn create_user(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Json(payload): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserWithRoles>), GovernanceError> {
    payload.validate()?;
    let created = state.users.create_user(Some(&actor), payload.into()).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /admin/users
#[tracing::instrument(skip(state, actor), fields(limit = query.limit, offset = query.offset))]
pub async fn list_users(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Query(query): Query<ListUsersQuery>,
) -> Result<Json<Page<UserResponse>>, GovernanceError> {
    let (items, total) = state
        .users
        .list_users(Some(&actor), &query.filter(), query.limit, query.offset)
        .await?;
    Ok(Json(Page {
        items,
        total,
        limit: query.limit,
        offset: query.offset,
    }))
}

/// GET /admin/users/:id
pub async fn get_user(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(user_id): Path<Uuid>,
) -> Result<Json<UserWithRoles>, GovernanceError> {
    Ok(Json(state.users.get_user(Some(&actor), user_id).await?))
}

/// PATCH /admin/users/:id
pub async fn update_user(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<Json<UserResponse>, GovernanceError> {
    payload.validate()?;
    let updated = state
        .users
        .update_user(Some(&actor), user_id, payload.into())
        .await?;
    Ok(Json(updated))
}

/// DELETE /admin/users/:id?hard=bool
pub async fn delete_user(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(user_id): Path<Uuid>,
    Query(query): Query<DeleteUserQuery>,
) -> Result<StatusCode, GovernanceError> {
    state
        .governance
        .delete_user(Some(&actor), user_id, query.hard)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /admin/users/:id/roles
///
/// 200 when the new role set was applied, 202 when it was queued for
/// approval.
pub async fn update_user_roles(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<UpdateUserRolesRequest>,
) -> Result<impl IntoResponse, GovernanceError> {
    payload.validate()?;
    let outcome = state
        .governance
        .update_user_roles(
            Some(&actor),
            user_id,
            &payload.role_ids,
            &payload.justification,
            payload.emergency,
        )
        .await?;

    let status = match outcome {
        RoleUpdateOutcome::Applied { .. } => StatusCode::OK,
        RoleUpdateOutcome::Queued { .. } => StatusCode::ACCEPTED,
    };
    Ok((status, Json(outcome)))
}

/// GET /admin/users/:id/sessions
pub async fn list_user_sessions(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<SessionInfo>>, GovernanceError> {
    let sessions = state
        .auth
        .sessions()
        .list_active(Some(&actor), user_id)
        .await?;
    Ok(Json(sessions))
}

/// GET /users/me
pub async fn me(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
) -> Result<Json<Profile>, GovernanceError> {
    Ok(Json(state.users.me(Some(&actor)).await?))
}
