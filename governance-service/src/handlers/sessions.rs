use axum::{
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::middleware::AuthUser;
use crate::services::GovernanceError;
use crate::AppState;

/// DELETE /admin/sessions/:id
pub async fn revoke_session(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode, GovernanceError> {
    state
        .auth
        .sessions()
        .revoke(Some(&actor), session_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /auth/logout
pub async fn logout(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
) -> Result<StatusCode, GovernanceError> {
    state.auth.sessions().logout(Some(&actor)).await?;
    Ok(StatusCode::NO_CONTENT)
}
