use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{header, request::Parts, Extensions, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;

use crate::models::RequestMeta;
use crate::services::{Actor, GovernanceError};
use crate::AppState;

/// Client address and agent as seen by this service.
pub fn request_meta(headers: &HeaderMap, extensions: &Extensions) -> RequestMeta {
    let ip_address = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        });
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.chars().take(512).collect());

    RequestMeta {
        ip_address,
        user_agent,
        session_id: None,
    }
}

/// Resolve the bearer session into an [`Actor`] for downstream handlers.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, GovernanceError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(GovernanceError::Unauthorized)?;

    let meta = request_meta(req.headers(), req.extensions());
    let actor = state.auth.authenticate_bearer(token, &meta).await?;

    req.extensions_mut().insert(actor);
    Ok(next.run(req).await)
}

/// The authenticated caller, placed by [`auth_middleware`].
pub struct AuthUser(pub Actor);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = GovernanceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Actor>()
            .cloned()
            .map(AuthUser)
            .ok_or(GovernanceError::Unauthorized)
    }
}

/// Request metadata for unauthenticated routes.
pub struct ClientMeta(pub RequestMeta);

#[axum::async_trait]
impl<S> FromRequestParts<S> for ClientMeta
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientMeta(request_meta(&parts.headers, &parts.extensions)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        headers.insert(header::USER_AGENT, "curl/8.0".parse().unwrap());

        let meta = request_meta(&headers, &Extensions::new());
        assert_eq!(meta.ip_address.as_deref(), Some("203.0.113.9"));
        assert_eq!(meta.user_agent.as_deref(), Some("curl/8.0"));
        assert!(meta.session_id.is_none());
    }
}
