mod common;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use common::{TestApp, TEST_PASSWORD};
use serde_json::json;
use subtitle_service::models::{AdminAction, AuditLogFilter, AuditOutcome, Role};
use subtitle_service::services::repository::{AuditLogRepository, SettingsRepository};

async fn audit_for(app: &TestApp, actor_id: uuid::Uuid) -> Vec<subtitle_service::models::AdminActionLog> {
    app.repo
        .list_audit_logs(&AuditLogFilter {
            actor_id: Some(actor_id),
            limit: 100,
            ..Default::default()
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn test_user_cannot_change_setting_and_attempt_is_audited() {
    let app = TestApp::spawn().await;
    let (user, token) = app.create_user(Role::User).await;

    let response = app
        .request(
            Method::PUT,
            "/api/admin/settings/price_per_minute_cents",
            Some(&token),
            Some(json!({ "value": "1" })),
        )
        .await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);
    assert_eq!(response.body["audit"]["logged"], true);

    let setting = app
        .repo
        .get_setting("price_per_minute_cents")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(setting.value, "100");

    let logs = audit_for(&app, user.id).await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].action, AdminAction::UpdateSetting);
    assert_eq!(logs[0].outcome, AuditOutcome::Rejected);
    assert_eq!(logs[0].actor_role, Role::User);
    assert_eq!(logs[0].target_id, "price_per_minute_cents");
}

#[tokio::test]
async fn test_admin_setting_change_reprices_new_orders() {
    let app = TestApp::spawn().await;
    let (admin, admin_token) = app.create_user(Role::Admin).await;
    let (_, user_token) = app.create_user(Role::User).await;

    let response = app
        .request(
            Method::PUT,
            "/api/admin/settings/price_per_minute_cents",
            Some(&admin_token),
            Some(json!({ "value": "600" })),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);
    assert_eq!(response.body["result"]["value"], "600");
    assert_eq!(response.body["audit"]["logged"], true);

    // 90 seconds at 600 cents per minute.
    let order_id = app.create_order(&user_token).await;
    assert_eq!(app.order(order_id).await.total_amount_cents, 900);

    let logs = audit_for(&app, admin.id).await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].outcome, AuditOutcome::Succeeded);
}

#[tokio::test]
async fn test_invalid_setting_value_is_rejected() {
    let app = TestApp::spawn().await;
    let (admin, token) = app.create_user(Role::Admin).await;

    let negative = app
        .request(
            Method::PUT,
            "/api/admin/settings/price_per_minute_cents",
            Some(&token),
            Some(json!({ "value": "-5" })),
        )
        .await;
    assert_eq!(negative.status, StatusCode::BAD_REQUEST);

    let unknown = app
        .request(
            Method::PUT,
            "/api/admin/settings/free_lunch",
            Some(&token),
            Some(json!({ "value": "1" })),
        )
        .await;
    assert_eq!(unknown.status, StatusCode::NOT_FOUND);

    let logs = audit_for(&app, admin.id).await;
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|l| l.outcome == AuditOutcome::Rejected));
}

#[tokio::test]
async fn test_admin_reads_require_read_all() {
    let app = TestApp::spawn().await;
    let (_, user_token) = app.create_user(Role::User).await;
    let (_, admin_token) = app.create_user(Role::Admin).await;

    for uri in [
        "/api/admin/users",
        "/api/admin/orders",
        "/api/admin/logs",
        "/api/admin/stats",
        "/api/admin/settings",
    ] {
        let denied = app.request(Method::GET, uri, Some(&user_token), None).await;
        assert_eq!(denied.status, StatusCode::FORBIDDEN, "{uri}");

        let allowed = app.request(Method::GET, uri, Some(&admin_token), None).await;
        assert_eq!(allowed.status, StatusCode::OK, "{uri}");
    }

    let stats = app
        .request(Method::GET, "/api/admin/stats?days_back=0", Some(&admin_token), None)
        .await;
    assert_eq!(stats.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_only_super_admin_changes_roles() {
    let app = TestApp::spawn().await;
    let (_, admin_token) = app.create_user(Role::Admin).await;
    let (_, super_token) = app.create_user(Role::SuperAdmin).await;
    let (target, target_token) = app.create_user(Role::User).await;
    let uri = format!("/api/admin/users/{}/role", target.id);

    let by_admin = app
        .request(Method::PUT, &uri, Some(&admin_token), Some(json!({ "role": "admin" })))
        .await;
    assert_eq!(by_admin.status, StatusCode::FORBIDDEN);

    let by_super = app
        .request(Method::PUT, &uri, Some(&super_token), Some(json!({ "role": "admin" })))
        .await;
    assert_eq!(by_super.status, StatusCode::OK, "{:?}", by_super.body);
    assert_eq!(by_super.body["result"]["role"], "admin");

    // Tokens carry the role they were issued with.
    let stale = app
        .request(Method::GET, "/api/admin/users", Some(&target_token), None)
        .await;
    assert_eq!(stale.status, StatusCode::FORBIDDEN);

    let login = app
        .request(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": target.email, "password": TEST_PASSWORD })),
        )
        .await;
    let fresh = login.body["access_token"].as_str().unwrap().to_string();
    let allowed = app
        .request(Method::GET, "/api/admin/users", Some(&fresh), None)
        .await;
    assert_eq!(allowed.status, StatusCode::OK);
}

#[tokio::test]
async fn test_admin_cannot_modify_privileged_accounts() {
    let app = TestApp::spawn().await;
    let (_, admin_token) = app.create_user(Role::Admin).await;
    let (other_admin, _) = app.create_user(Role::Admin).await;
    let (plain, _) = app.create_user(Role::User).await;

    let privileged = app
        .request(
            Method::PUT,
            &format!("/api/admin/users/{}", other_admin.id),
            Some(&admin_token),
            Some(json!({ "is_active": false })),
        )
        .await;
    assert_eq!(privileged.status, StatusCode::FORBIDDEN);

    let regular = app
        .request(
            Method::PUT,
            &format!("/api/admin/users/{}", plain.id),
            Some(&admin_token),
            Some(json!({ "is_active": false })),
        )
        .await;
    assert_eq!(regular.status, StatusCode::OK);
    assert_eq!(regular.body["result"]["is_active"], false);
}

#[tokio::test]
async fn test_failed_audit_write_is_reported_not_rolled_back() {
    let app = TestApp::spawn().await;
    let (_, token) = app.create_user(Role::Admin).await;
    app.repo.set_audit_failure(true);

    let response = app
        .request(
            Method::PUT,
            "/api/admin/settings/max_files_per_order",
            Some(&token),
            Some(json!({ "value": "3" })),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["audit"]["logged"], false);
    assert!(response.body["audit"]["error"].is_string());

    let setting = app
        .repo
        .get_setting("max_files_per_order")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(setting.value, "3");
}

#[tokio::test]
async fn test_rejected_action_reports_failed_audit_write() {
    let app = TestApp::spawn().await;
    let (_, token) = app.create_user(Role::User).await;
    app.repo.set_audit_failure(true);

    let response = app
        .request(
            Method::PUT,
            "/api/admin/settings/price_per_minute_cents",
            Some(&token),
            Some(json!({ "value": "1" })),
        )
        .await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);
    assert!(response.body["error"].as_str().unwrap().contains("manage_settings"));
    assert_eq!(response.body["audit"]["logged"], false);
    assert!(response.body["audit"]["error"].is_string());
}

fn raw_request(uri: &str, token: &str, body: &'static str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_malformed_admin_body_is_forbidden_for_users_and_audited() {
    let app = TestApp::spawn().await;
    let (user, user_token) = app.create_user(Role::User).await;
    let (admin, admin_token) = app.create_user(Role::Admin).await;
    let order_id = app.create_order(&user_token).await;
    let uri = format!("/api/admin/orders/{order_id}/refund");

    let by_user = app.send(raw_request(&uri, &user_token, "{not json")).await;
    assert_eq!(by_user.status, StatusCode::FORBIDDEN);
    assert_eq!(by_user.body["audit"]["logged"], true);

    let by_admin = app.send(raw_request(&uri, &admin_token, "{not json")).await;
    assert_eq!(by_admin.status, StatusCode::BAD_REQUEST);

    let invalid = app
        .request(
            Method::PUT,
            &format!("/api/admin/orders/{order_id}"),
            Some(&user_token),
            Some(json!({ "admin_notes": "" })),
        )
        .await;
    assert_eq!(invalid.status, StatusCode::FORBIDDEN);

    let user_logs = audit_for(&app, user.id).await;
    assert_eq!(user_logs.len(), 2);
    assert!(user_logs.iter().all(|l| l.outcome == AuditOutcome::Rejected));

    let admin_logs = audit_for(&app, admin.id).await;
    assert_eq!(admin_logs.len(), 1);
    assert_eq!(admin_logs[0].action, AdminAction::RefundOrder);
    assert_eq!(admin_logs[0].target_id, order_id.to_string());
    assert!(app.payments.refunds().is_empty());
}

#[tokio::test]
async fn test_users_cannot_see_each_others_orders() {
    let app = TestApp::spawn().await;
    let (_, owner_token) = app.create_user(Role::User).await;
    let (_, other_token) = app.create_user(Role::User).await;
    let (_, admin_token) = app.create_user(Role::Admin).await;
    let order_id = app.create_order(&owner_token).await;

    let own = app
        .request(Method::GET, &format!("/api/orders/{order_id}"), Some(&owner_token), None)
        .await;
    assert_eq!(own.status, StatusCode::OK);

    let foreign = app
        .request(Method::GET, &format!("/api/orders/{order_id}"), Some(&other_token), None)
        .await;
    assert_eq!(foreign.status, StatusCode::NOT_FOUND);

    let listed = app
        .request(Method::GET, "/api/orders", Some(&other_token), None)
        .await;
    assert_eq!(listed.body.as_array().map(Vec::len), Some(0));

    let admin_view = app
        .request(
            Method::GET,
            &format!("/api/admin/orders/{order_id}"),
            Some(&admin_token),
            None,
        )
        .await;
    assert_eq!(admin_view.status, StatusCode::OK);
}
