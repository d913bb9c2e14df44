//! SUPER_ADMIN quorum and self-action guards.

mod common;

use common::{yielding::YieldingStore, TestApp};
use governance_service::{
    models::{AuditAction, ChangeAction, UserPatch, ANALYST, SUPER_ADMIN, USER_ADMIN},
    services::{Clock, GovernanceError, RolePatch, RoleUpdateOutcome},
};
use std::sync::Arc;

#[tokio::test]
async fn test_delete_self_is_forbidden() {
    let app = TestApp::new().await;
    let admin = app.seed_actor("root@corp.example", &[SUPER_ADMIN]).await;

    let err = app
        .state
        .governance
        .delete_user(Some(&admin), admin.user_id, false)
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::SelfActionForbidden(_)));
}

#[tokio::test]
async fn test_deleting_one_of_two_super_admins_violates_quorum() {
    let app = TestApp::new().await;
    let admin = app.seed_actor("a@corp.example", &[SUPER_ADMIN]).await;
    let other = app.seed_user("b@corp.example", &[SUPER_ADMIN]).await;

    let err = app
        .state
        .governance
        .delete_user(Some(&admin), other.user_id, false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GovernanceError::QuorumViolation {
            current: 2,
            required: 3
        }
    ));

    let stored = app.store.find_user(other.user_id).await.unwrap().unwrap();
    assert!(!stored.is_deleted());
    assert_eq!(app.role_names(other.user_id).await, vec![SUPER_ADMIN]);
}

#[tokio::test]
async fn test_deleting_one_of_three_super_admins_succeeds() {
    let app = TestApp::new().await;
    let admin = app.seed_actor("a@corp.example", &[SUPER_ADMIN]).await;
    app.seed_user("b@corp.example", &[SUPER_ADMIN]).await;
    let victim = app.seed_user("c@corp.example", &[SUPER_ADMIN, ANALYST]).await;

    app.state
        .governance
        .delete_user(Some(&admin), victim.user_id, false)
        .await
        .unwrap();

    let stored = app.store.find_user(victim.user_id).await.unwrap().unwrap();
    assert!(stored.is_deleted());
    assert!(!stored.active);

    let assignments = app.store.list_assignments(victim.user_id).await.unwrap();
    assert_eq!(assignments.len(), 2);
    assert!(assignments.iter().all(|a| !a.active));
    assert!(app.role_names(victim.user_id).await.is_empty());
    assert_eq!(
        app.store
            .count_role_holders(SUPER_ADMIN, app.clock.now())
            .await
            .unwrap(),
        2
    );
}

#[tokio::test]
async fn test_non_super_admin_targets_are_not_quorum_checked() {
    let app = TestApp::new().await;
    let admin = app.seed_actor("a@corp.example", &[SUPER_ADMIN]).await;
    let analyst = app.seed_user("analyst@corp.example", &[ANALYST]).await;

    app.state
        .governance
        .delete_user(Some(&admin), analyst.user_id, false)
        .await
        .unwrap();

    let err = app
        .state
        .governance
        .delete_user(Some(&admin), analyst.user_id, false)
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::NotFound(_)));
}

#[tokio::test]
async fn test_hard_delete_requires_super_admin() {
    let app = TestApp::new().await;
    let user_admin_role = governance_service::models::Role::new(
        "DELETER",
        None,
        [governance_service::models::Permission::UserDelete]
            .into_iter()
            .collect(),
        app.clock.now(),
    );
    app.store.create_role(&user_admin_role, &[]).await.unwrap();
    let deleter = app.seed_actor("deleter@corp.example", &["DELETER"]).await;
    let target = app.seed_user("t@corp.example", &[ANALYST]).await;

    let err = app
        .state
        .governance
        .delete_user(Some(&deleter), target.user_id, true)
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::Forbidden(_)));

    app.state
        .governance
        .delete_user(Some(&deleter), target.user_id, false)
        .await
        .unwrap();

    let admin = app.seed_actor("root@corp.example", &[SUPER_ADMIN]).await;
    app.state
        .governance
        .delete_user(Some(&admin), target.user_id, true)
        .await
        .unwrap();
    assert!(app.store.find_user(target.user_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_approving_removal_of_super_admin_respects_quorum() {
    let app = TestApp::new().await;
    let requester = app.seed_actor("req@corp.example", &[USER_ADMIN]).await;
    let approver = app.seed_actor("a@corp.example", &[SUPER_ADMIN]).await;
    let target = app.seed_user("b@corp.example", &[SUPER_ADMIN]).await;
    let analyst = app.role(ANALYST).await;

    let RoleUpdateOutcome::Queued { change_request } = app
        .state
        .governance
        .update_user_roles(
            Some(&requester),
            target.user_id,
            &[analyst.role_id],
            "Stepping down from administration",
            false,
        )
        .await
        .unwrap()
    else {
        panic!("expected a queued request");
    };

    let err = app
        .state
        .governance
        .process_change_request(
            Some(&approver),
            change_request.request_id,
            ChangeAction::Approve,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::QuorumViolation { .. }));
    assert_eq!(app.role_names(target.user_id).await, vec![SUPER_ADMIN]);

    app.seed_user("c@corp.example", &[SUPER_ADMIN]).await;
    app.state
        .governance
        .process_change_request(
            Some(&approver),
            change_request.request_id,
            ChangeAction::Approve,
            None,
        )
        .await
        .unwrap();
    assert_eq!(app.role_names(target.user_id).await, vec![ANALYST]);
}

#[tokio::test]
async fn test_suspending_a_super_admin_respects_quorum() {
    let app = TestApp::new().await;
    let admin = app.seed_actor("a@corp.example", &[SUPER_ADMIN]).await;
    let other = app.seed_user("b@corp.example", &[SUPER_ADMIN]).await;

    let patch = UserPatch {
        suspended: Some(true),
        ..Default::default()
    };
    let err = app
        .state
        .users
        .update_user(Some(&admin), other.user_id, patch.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::QuorumViolation { .. }));

    let err = app
        .state
        .users
        .update_user(Some(&admin), admin.user_id, patch)
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::SelfActionForbidden(_)));
}

#[tokio::test]
async fn test_super_admin_role_cannot_be_disabled() {
    let app = TestApp::new().await;
    let admin = app.seed_actor("a@corp.example", &[SUPER_ADMIN]).await;
    let role = app.role(SUPER_ADMIN).await;

    let err = app
        .state
        .roles
        .update_role(
            Some(&admin),
            role.role_id,
            RolePatch {
                active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::QuorumViolation { .. }));

    let err = app
        .state
        .roles
        .update_role(
            Some(&admin),
            role.role_id,
            RolePatch {
                permissions: Some(vec!["user:read".to_string()]),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::QuorumViolation { .. }));

    let updated = app
        .state
        .roles
        .update_role(
            Some(&admin),
            role.role_id,
            RolePatch {
                description: Some("Break-glass administrators".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.description.as_deref(), Some("Break-glass administrators"));
}

#[tokio::test]
async fn test_execute_role_update_replaces_the_set_unless_quorum_breaks() {
    let app = TestApp::new().await;
    let admin = app.seed_actor("a@corp.example", &[SUPER_ADMIN]).await;
    let other = app.seed_user("b@corp.example", &[SUPER_ADMIN]).await;
    let analyst_user = app.seed_user("c@corp.example", &[ANALYST]).await;
    let analyst = app.role(ANALYST).await;
    let user_admin = app.role(USER_ADMIN).await;
    let engine = &app.state.governance;

    let err = engine
        .execute_role_update(&admin, other.user_id, &[analyst.role_id], "Rotating duties")
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::QuorumViolation { .. }));
    assert_eq!(app.role_names(other.user_id).await, vec![SUPER_ADMIN]);

    let assignments = engine
        .execute_role_update(
            &admin,
            analyst_user.user_id,
            &[user_admin.role_id, analyst.role_id, user_admin.role_id],
            "Promoted to team lead",
        )
        .await
        .unwrap();
    assert_eq!(assignments.len(), 2);
    assert_eq!(
        app.role_names(analyst_user.user_id).await,
        vec![ANALYST, USER_ADMIN]
    );

    let history = app.store.list_assignments(analyst_user.user_id).await.unwrap();
    assert_eq!(history.iter().filter(|a| a.active).count(), 2);
    assert_eq!(history.iter().filter(|a| !a.active).count(), 1);
}

fn is_quorum_violation<T>(result: &Result<T, GovernanceError>) -> bool {
    matches!(
        result,
        Err(GovernanceError::QuorumViolation {
            current: 2,
            required: 3
        })
    )
}

#[tokio::test]
async fn test_concurrent_deletes_cannot_break_quorum() {
    let app = TestApp::with_store(Arc::new(YieldingStore::new())).await;
    let a = app.seed_actor("a@corp.example", &[SUPER_ADMIN]).await;
    let b = app.seed_actor("b@corp.example", &[SUPER_ADMIN]).await;
    let c = app.seed_user("c@corp.example", &[SUPER_ADMIN]).await;
    let engine = &app.state.governance;

    // Both calls read three holders before either one writes.
    let (first, second) = tokio::join!(
        engine.delete_user(Some(&a), c.user_id, false),
        engine.delete_user(Some(&b), a.user_id, false),
    );

    assert_eq!([first.is_ok(), second.is_ok()].iter().filter(|ok| **ok).count(), 1);
    assert!(is_quorum_violation(&first) || is_quorum_violation(&second));
    assert_eq!(
        app.store
            .count_role_holders(SUPER_ADMIN, app.clock.now())
            .await
            .unwrap(),
        2
    );
    assert_eq!(app.audit_entries(AuditAction::UserDeleted).await.len(), 1);
}

#[tokio::test]
async fn test_concurrent_demotion_and_suspension_cannot_break_quorum() {
    let app = TestApp::with_store(Arc::new(YieldingStore::new())).await;
    let a = app.seed_actor("a@corp.example", &[SUPER_ADMIN]).await;
    let b = app.seed_actor("b@corp.example", &[SUPER_ADMIN]).await;
    let c = app.seed_user("c@corp.example", &[SUPER_ADMIN]).await;
    let analyst = app.role(ANALYST).await;
    let new_roles = [analyst.role_id];

    let (demoted, suspended) = tokio::join!(
        app.state.governance.update_user_roles(
            Some(&a),
            c.user_id,
            &new_roles,
            "Emergency rotation of admin duties",
            true,
        ),
        app.state.users.update_user(
            Some(&b),
            a.user_id,
            UserPatch {
                suspended: Some(true),
                ..Default::default()
            },
        ),
    );

    assert!(demoted.is_ok() != suspended.is_ok());
    assert!(is_quorum_violation(&demoted) || is_quorum_violation(&suspended));
    assert_eq!(
        app.store
            .count_role_holders(SUPER_ADMIN, app.clock.now())
            .await
            .unwrap(),
        2
    );
}
