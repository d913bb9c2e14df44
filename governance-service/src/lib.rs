pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    extract::State,
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{from_fn, from_fn_with_state},
    response::IntoResponse,
    routing::{delete, get, patch, post, put},
    Json, Router,
};
use chrono::Duration;
use serde::Serialize;
use service_core::middleware::{
    create_ip_rate_limiter, ip_rate_limit_middleware, request_id_middleware, IpRateLimiter,
    REQUEST_ID_HEADER,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::GovernanceConfig;
use crate::models::ProvisioningRule;
use crate::services::{
    AttemptCounter, AuditRecorder, AuthService, Clock, GovernanceEngine, GovernanceStore,
    PermissionResolver, ProvisioningGate, RoleAdmin, SessionRegistry, UserAdmin,
};

#[derive(Clone)]
pub struct AppState {
    pub config: GovernanceConfig,
    pub store: Arc<dyn GovernanceStore>,
    pub clock: Arc<dyn Clock>,
    pub attempts: Arc<dyn AttemptCounter>,
    pub audit: AuditRecorder,
    pub users: UserAdmin,
    pub roles: RoleAdmin,
    pub governance: GovernanceEngine,
    pub provisioning: ProvisioningGate,
    pub auth: AuthService,
    pub login_rate_limiter: IpRateLimiter,
    pub ip_rate_limiter: IpRateLimiter,
}

impl AppState {
    /// Wire every service over one store, clock and attempt counter.
    pub fn new(
        config: GovernanceConfig,
        store: Arc<dyn GovernanceStore>,
        clock: Arc<dyn Clock>,
        attempts: Arc<dyn AttemptCounter>,
        rules: Vec<ProvisioningRule>,
    ) -> Self {
        let settings = config.governance.clone();
        let audit = AuditRecorder::new(store.clone(), clock.clone());
        let users = UserAdmin::new(store.clone(), clock.clone(), audit.clone(), &settings);
        let roles = RoleAdmin::new(
            store.clone(),
            clock.clone(),
            audit.clone(),
            settings.super_admin_quorum,
        );
        let governance =
            GovernanceEngine::new(store.clone(), clock.clone(), audit.clone(), settings.clone());
        let provisioning = ProvisioningGate::new(
            store.clone(),
            clock.clone(),
            audit.clone(),
            rules,
            Duration::days(settings.pending_approval_ttl_days),
        );
        let sessions = SessionRegistry::new(
            store.clone(),
            clock.clone(),
            audit.clone(),
            Duration::minutes(config.sessions.ttl_minutes),
        );
        let auth = AuthService::new(
            store.clone(),
            clock.clone(),
            audit.clone(),
            sessions,
            PermissionResolver::new(store.clone(), clock.clone()),
            provisioning.clone(),
            attempts.clone(),
            config.lockout.clone(),
        );
        let login_rate_limiter = create_ip_rate_limiter(
            config.rate_limit.login_attempts,
            config.rate_limit.login_window_seconds,
        );
        let ip_rate_limiter = create_ip_rate_limiter(
            config.rate_limit.global_ip_limit,
            config.rate_limit.global_ip_window_seconds,
        );

        Self {
            config,
            store,
            clock,
            attempts,
            audit,
            users,
            roles,
            governance,
            provisioning,
            auth,
            login_rate_limiter,
            ip_rate_limiter,
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    database: &'static str,
    redis: &'static str,
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = match state.store.health_check().await {
        Ok(()) => "up",
        Err(e) => {
            tracing::error!(error = %e, "Database health check failed");
            "down"
        }
    };
    let redis = match state.attempts.health_check().await {
        Ok(()) => "up",
        Err(e) => {
            tracing::error!(error = %e, "Redis health check failed");
            "down"
        }
    };

    let healthy = database == "up" && redis == "up";
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(HealthResponse {
            status: if healthy { "ok" } else { "degraded" },
            database,
            redis,
        }),
    )
}

pub fn build_router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route(
            "/admin/users",
            post(handlers::users::create_user).get(handlers::users::list_users),
        )
        .route(
            "/admin/users/:id",
            get(handlers::users::get_user)
                .patch(handlers::users::update_user)
                .delete(handlers::users::delete_user),
        )
        .route("/admin/users/:id/roles", put(handlers::users::update_user_roles))
        .route(
            "/admin/users/:id/sessions",
            get(handlers::users::list_user_sessions),
        )
        .route(
            "/admin/change-requests",
            get(handlers::change_requests::list_change_requests),
        )
        .route(
            "/admin/change-requests/:id/approve",
            post(handlers::change_requests::approve_change_request),
        )
        .route(
            "/admin/change-requests/:id/reject",
            post(handlers::change_requests::reject_change_request),
        )
        .route(
            "/admin/pending-approvals",
            get(handlers::pending_approvals::list_pending_approvals),
        )
        .route(
            "/admin/pending-approvals/:id/approve",
            post(handlers::pending_approvals::approve_pending_approval),
        )
        .route(
            "/admin/pending-approvals/:id/reject",
            post(handlers::pending_approvals::reject_pending_approval),
        )
        .route("/admin/audit", get(handlers::audit::list_audit_log))
        .route("/admin/anomalies", get(handlers::audit::list_anomalies))
        .route(
            "/admin/roles",
            get(handlers::roles::list_roles).post(handlers::roles::create_role),
        )
        .route("/admin/roles/:id", patch(handlers::roles::update_role))
        .route("/admin/sessions/:id", delete(handlers::sessions::revoke_session))
        .route("/auth/logout", post(handlers::sessions::logout))
        .route("/users/me", get(handlers::users::me))
        .layer(from_fn_with_state(state.clone(), middleware::auth_middleware));

    let login_route = Router::new()
        .route("/auth/login", post(handlers::auth::login))
        .layer(from_fn_with_state(
            state.login_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let allowed_origins: Vec<HeaderValue> = state
        .config
        .security
        .allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!("Invalid CORS origin '{}': {}", o, e);
                None
            }
        })
        .collect();

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .merge(login_route)
        .merge(admin_routes)
        .with_state(state.clone())
        .layer(from_fn_with_state(
            state.ip_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ))
        .layer(from_fn(middleware::metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(allowed_origins)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::PATCH,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]),
        )
}
