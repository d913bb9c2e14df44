//! Shared harness: the full service over the in-memory store, a fixed clock
//! and the mock attempt counter.
#![allow(dead_code)]

pub mod yielding;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{DateTime, TimeZone, Utc};
use governance_service::{
    build_router,
    config::GovernanceConfig,
    models::{AuditAction, AuditFilter, ProvisioningRule, RequestMeta, Role, RoleAssignment, User},
    services::{
        bootstrap::seed_default_roles, Actor, Clock, FixedClock, GovernanceStore, InMemoryStore,
        MockAttemptCounter, PermissionResolver,
    },
    utils::{hash_password, Password},
    AppState,
};
use secrecy::SecretString;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

pub const PASSWORD: &str = "correct-horse-battery";

/// Wednesday, mid-morning UTC: inside business hours.
pub fn business_hours() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 4, 10, 0, 0).unwrap()
}

pub fn password(raw: &str) -> Password {
    Password::from(SecretString::new(raw.to_string()))
}

pub struct TestApp {
    pub state: AppState,
    pub store: Arc<dyn GovernanceStore>,
    pub clock: Arc<FixedClock>,
    pub attempts: Arc<MockAttemptCounter>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_rules(Vec::new()).await
    }

    pub async fn with_rules(rules: Vec<ProvisioningRule>) -> Self {
        Self::build(Arc::new(InMemoryStore::new()), rules).await
    }

    /// Run the service over a caller-supplied store.
    pub async fn with_store(store: Arc<dyn GovernanceStore>) -> Self {
        Self::build(store, Vec::new()).await
    }

    async fn build(store: Arc<dyn GovernanceStore>, rules: Vec<ProvisioningRule>) -> Self {
        let clock = Arc::new(FixedClock::new(business_hours()));
        let attempts = Arc::new(MockAttemptCounter::new());
        let dyn_clock: Arc<dyn Clock> = clock.clone();

        let state = AppState::new(
            GovernanceConfig::default(),
            store.clone(),
            dyn_clock.clone(),
            attempts.clone(),
            rules,
        );
        seed_default_roles(&store, &dyn_clock, &state.audit)
            .await
            .expect("seed roles");

        Self {
            state,
            store,
            clock,
            attempts,
        }
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    pub async fn role(&self, name: &str) -> Role {
        self.store
            .find_role_by_name(name)
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("role {} missing", name))
    }

    /// Insert a user with the named roles directly, bypassing governance.
    pub async fn seed_user(&self, email: &str, roles: &[&str]) -> User {
        self.seed_user_with_password(email, roles, None).await
    }

    pub async fn seed_user_with_password(
        &self,
        email: &str,
        roles: &[&str],
        secret: Option<&str>,
    ) -> User {
        let now = self.clock.now();
        let user = User::new(email, email, None, now);
        let mut assignments = Vec::new();
        for name in roles {
            let role = self.role(name).await;
            assignments.push(RoleAssignment::new(user.user_id, role.role_id, None, now));
        }
        let credential = secret.map(|p| hash_password(&password(p)).unwrap().into_string());
        self.store
            .create_user(&user, credential.as_deref(), &assignments, &[])
            .await
            .unwrap();
        user
    }

    pub async fn actor(&self, user: &User) -> Actor {
        let resolver = PermissionResolver::new(self.store.clone(), self.clock.clone());
        Actor {
            user_id: user.user_id,
            email: user.email.clone(),
            session_id: None,
            permissions: resolver.effective_permissions(user.user_id).await.unwrap(),
            meta: RequestMeta::default(),
        }
    }

    pub async fn seed_actor(&self, email: &str, roles: &[&str]) -> Actor {
        let user = self.seed_user(email, roles).await;
        self.actor(&user).await
    }

    /// Sorted names of the roles `user_id` effectively holds now.
    pub async fn role_names(&self, user_id: Uuid) -> Vec<String> {
        let mut names: Vec<String> = self
            .store
            .effective_roles(user_id, self.clock.now())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        names.sort();
        names
    }

    pub async fn audit_entries(&self, action: AuditAction) -> Vec<governance_service::models::AuditLogEntry> {
        let filter = AuditFilter {
            action: Some(action),
            ..Default::default()
        };
        self.store.list_audit(&filter, 200, 0).await.unwrap().0
    }

    pub async fn audit_total(&self) -> i64 {
        self.store
            .list_audit(&AuditFilter::default(), 1, 0)
            .await
            .unwrap()
            .1
    }

    /// Log in over HTTP and return the bearer token.
    pub async fn login(&self, email: &str, password: &str) -> String {
        let (status, body) = self
            .request(
                Method::POST,
                "/auth/login",
                None,
                Some(serde_json::json!({ "email": email, "password": password })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {}", body);
        body["token"].as_str().unwrap().to_string()
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }
}
