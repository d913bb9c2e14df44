use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::dtos::admin::{CreateRoleRequest, UpdateRoleRequest};
use crate::middleware::AuthUser;
use crate::models::RoleResponse;
use crate::services::GovernanceError;
use crate::AppState;

/// GET /admin/roles
pub async fn list_roles(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
) -> Result<Json<Vec<RoleResponse>>, GovernanceError> {
    Ok(Json(state.roles.list_roles(Some(&actor)).await?))
}

/// POST /admin/roles
pub async fn create_role(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Json(payload): Json<CreateRoleRequest>,
) -> Result<(StatusCode, Json<RoleResponse>), GovernanceError> {
    payload.validate()?;
    let role = state
        .roles
        .create_role(
            Some(&actor),
            &payload.name,
            payload.description,
            &payload.permissions,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(role)))
}

/// PATCH /admin/roles/:id
pub async fn update_role(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(role_id): Path<Uuid>,
    Json(payload): Json<UpdateRoleRequest>,
) -> Result<Json<RoleResponse>, GovernanceError> {
    payload.validate()?;
    let role = state
        .roles
        .update_role(Some(&actor), role_id, payload.into())
        .await?;
    Ok(Json(role))
}
