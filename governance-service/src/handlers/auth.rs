use axum::{extract::State, Json};
use secrecy::SecretString;
use validator::Validate;

use crate::dtos::auth::LoginRequest;
use crate::middleware::ClientMeta;
use crate::services::{GovernanceError, LoginSession};
use crate::utils::Password;
use crate::AppState;

/// POST /auth/login
#[tracing::instrument(skip(state, meta, payload))]
pub async fn login(
    State(state): State<AppState>,
    ClientMeta(meta): ClientMeta,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginSession>, GovernanceError> {
    payload.validate()?;
    let password = Password::from(SecretString::new(payload.password));
    let session = state.auth.login(&payload.email, &password, &meta).await?;
    Ok(Json(session))
}
