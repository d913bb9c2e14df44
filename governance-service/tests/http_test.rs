//! End-to-end checks through the axum router.

mod common;

use axum::http::{Method, StatusCode};
use common::{TestApp, PASSWORD};
use governance_service::models::{ANALYST, AUDITOR, SUPER_ADMIN, USER_ADMIN};
use serde_json::json;

#[tokio::test]
async fn test_health_reports_backends() {
    let app = TestApp::new().await;
    let (status, body) = app.request(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "up");
    assert_eq!(body["redis"], "up");
}

#[tokio::test]
async fn test_metrics_endpoint_is_public() {
    let app = TestApp::new().await;
    let (status, _) = app.request(Method::GET, "/metrics", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_admin_routes_require_a_bearer_token() {
    let app = TestApp::new().await;
    let (status, body) = app
        .request(Method::GET, "/admin/users", None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["kind"], "unauthorized");

    let (status, _) = app
        .request(Method::GET, "/admin/users", Some("bogus"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_login_then_fetch_own_profile() {
    let app = TestApp::new().await;
    app.seed_user_with_password("me@corp.example", &[ANALYST], Some(PASSWORD))
        .await;

    let (status, body) = app
        .request(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "email": "me@corp.example", "password": "wrong-password" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["kind"], "invalid_credentials");

    let token = app.login("me@corp.example", PASSWORD).await;
    let (status, body) = app
        .request(Method::GET, "/users/me", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "me@corp.example");

    let (status, _) = app
        .request(Method::POST, "/auth/logout", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app
        .request(Method::GET, "/users/me", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_create_user_over_http() {
    let app = TestApp::new().await;
    app.seed_user_with_password("root@corp.example", &[SUPER_ADMIN], Some(PASSWORD))
        .await;
    app.seed_user_with_password("viewer@corp.example", &[AUDITOR], Some(PASSWORD))
        .await;
    let token = app.login("root@corp.example", PASSWORD).await;

    let (status, body) = app
        .request(
            Method::POST,
            "/admin/users",
            Some(&token),
            Some(json!({
                "email": "new@corp.example",
                "username": "new",
                "password": "a-long-enough-secret",
                "roles": [ANALYST],
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["email"], "new@corp.example");
    assert_eq!(body["roles"], json!([ANALYST]));

    let (status, body) = app
        .request(
            Method::POST,
            "/admin/users",
            Some(&token),
            Some(json!({ "email": "not-an-email", "username": "x" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["kind"], "validation_failed");

    let (status, body) = app
        .request(
            Method::POST,
            "/admin/users",
            Some(&token),
            Some(json!({ "email": "new@corp.example", "username": "again" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "duplicate_identity");

    let viewer = app.login("viewer@corp.example", PASSWORD).await;
    let (status, body) = app
        .request(
            Method::POST,
            "/admin/users",
            Some(&viewer),
            Some(json!({ "email": "other@corp.example", "username": "other" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["kind"], "forbidden");

    let (status, body) = app
        .request(Method::GET, "/admin/users?limit=10", Some(&viewer), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["limit"], 10);
    assert_eq!(body["total"], 3);
}

#[tokio::test]
async fn test_role_change_is_queued_then_approved() {
    let app = TestApp::new().await;
    app.seed_user_with_password("ua@corp.example", &[USER_ADMIN], Some(PASSWORD))
        .await;
    app.seed_user_with_password("root@corp.example", &[SUPER_ADMIN], Some(PASSWORD))
        .await;
    let target = app.seed_user("target@corp.example", &[ANALYST]).await;
    let auditor = app.role(AUDITOR).await;

    let requester = app.login("ua@corp.example", PASSWORD).await;
    let (status, body) = app
        .request(
            Method::PUT,
            &format!("/admin/users/{}/roles", target.user_id),
            Some(&requester),
            Some(json!({
                "role_ids": [auditor.role_id],
                "justification": "Joining the audit rotation",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED, "{}", body);
    assert_eq!(body["outcome"], "queued");
    let request_id = body["change_request"]["request_id"]
        .as_str()
        .unwrap()
        .to_string();
    assert_eq!(app.role_names(target.user_id).await, vec![ANALYST]);

    // The requester cannot approve their own request.
    let (status, _) = app
        .request(
            Method::POST,
            &format!("/admin/change-requests/{}/approve", request_id),
            Some(&requester),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let approver = app.login("root@corp.example", PASSWORD).await;
    let (status, body) = app
        .request(Method::GET, "/admin/change-requests?status=pending", Some(&approver), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);

    let (status, body) = app
        .request(
            Method::POST,
            &format!("/admin/change-requests/{}/approve", request_id),
            Some(&approver),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["status"], "approved");
    assert_eq!(app.role_names(target.user_id).await, vec![AUDITOR]);

    let (status, body) = app
        .request(
            Method::POST,
            &format!("/admin/change-requests/{}/reject", request_id),
            Some(&approver),
            Some(json!({ "reason": "too late" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "request_not_pending");
}

#[tokio::test]
async fn test_quorum_violation_surfaces_as_conflict() {
    let app = TestApp::new().await;
    app.seed_user_with_password("a@corp.example", &[SUPER_ADMIN], Some(PASSWORD))
        .await;
    let other = app.seed_user("b@corp.example", &[SUPER_ADMIN]).await;
    let token = app.login("a@corp.example", PASSWORD).await;

    let (status, body) = app
        .request(
            Method::DELETE,
            &format!("/admin/users/{}", other.user_id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "quorum_violation");
}
