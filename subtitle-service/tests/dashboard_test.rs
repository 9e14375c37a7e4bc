mod common;

use axum::http::{Method, StatusCode};
use common::{checkout_completed_event, TestApp};
use serde_json::json;
use subtitle_service::models::{OrderStatus, Role};

#[tokio::test]
async fn test_overview_reflects_own_orders_and_spend() {
    let app = TestApp::spawn().await;
    let (_, token) = app.create_user(Role::User).await;
    let (_, other_token) = app.create_user(Role::User).await;

    let paid = app.create_order(&token).await;
    app.create_order(&token).await;
    let foreign = app.create_order(&other_token).await;
    app.complete_order(paid, "pi_dash_own").await;
    app.complete_order(foreign, "pi_dash_other").await;

    let overview = app
        .request(Method::GET, "/api/dashboard/overview", Some(&token), None)
        .await;
    assert_eq!(overview.status, StatusCode::OK, "{:?}", overview.body);
    assert_eq!(overview.body["total_orders"], 2);
    assert_eq!(overview.body["completed_orders"], 1);
    assert_eq!(overview.body["processing_orders"], 0);
    assert_eq!(overview.body["orders_by_status"]["created"], 1);
    assert_eq!(overview.body["total_spent_cents"], 150);

    let other = app
        .request(Method::GET, "/api/dashboard/overview", Some(&other_token), None)
        .await;
    assert_eq!(other.body["total_orders"], 1);
    assert_eq!(other.body["total_spent_cents"], 150);
}

#[tokio::test]
async fn test_recent_orders_respect_limit_and_owner() {
    let app = TestApp::spawn().await;
    let (_, token) = app.create_user(Role::User).await;
    let (_, other_token) = app.create_user(Role::User).await;
    for _ in 0..3 {
        app.create_order(&token).await;
    }
    app.create_order(&other_token).await;

    let default_limit = app
        .request(Method::GET, "/api/dashboard/recent-orders", Some(&token), None)
        .await;
    assert_eq!(default_limit.status, StatusCode::OK);
    let orders = default_limit.body.as_array().unwrap();
    assert_eq!(orders.len(), 3);
    assert_eq!(orders[0]["video_title"], "lecture.mp4");
    assert_eq!(orders[0]["total_amount_cents"], 150);
    assert_eq!(orders[0]["status"], "created");

    let limited = app
        .request(
            Method::GET,
            "/api/dashboard/recent-orders?limit=2",
            Some(&token),
            None,
        )
        .await;
    assert_eq!(limited.body.as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn test_downloads_list_completed_order_files() {
    let app = TestApp::spawn().await;
    let (_, token) = app.create_user(Role::User).await;
    let (_, other_token) = app.create_user(Role::User).await;
    let order_id = app.create_order(&token).await;
    app.create_order(&token).await;

    app.send(app.webhook_request(&checkout_completed_event(order_id, "pi_dl")))
        .await;
    app.wait_for_status(order_id, OrderStatus::Completed).await;

    let downloads = app
        .request(Method::GET, "/api/dashboard/downloads", Some(&token), None)
        .await;
    assert_eq!(downloads.status, StatusCode::OK, "{:?}", downloads.body);
    let files = downloads.body.as_array().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["order_id"], order_id.to_string());
    assert_eq!(files[0]["video_name"], "lecture.mp4");
    assert!(files[0]["file_name"].as_str().unwrap().ends_with(".srt"));

    let foreign = app
        .request(Method::GET, "/api/dashboard/downloads", Some(&other_token), None)
        .await;
    assert_eq!(foreign.body.as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn test_dashboard_requires_authentication() {
    let app = TestApp::spawn().await;

    for uri in [
        "/api/dashboard/overview",
        "/api/dashboard/recent-orders",
        "/api/dashboard/downloads",
    ] {
        let response = app.request(Method::GET, uri, None, None).await;
        assert_eq!(response.status, StatusCode::UNAUTHORIZED, "{uri}");
    }
}

#[tokio::test]
async fn test_oversized_video_duration_is_rejected() {
    let app = TestApp::spawn().await;
    let (_, token) = app.create_user(Role::User).await;

    let response = app
        .request(
            Method::POST,
            "/api/orders",
            Some(&token),
            Some(json!({
                "videos": [{
                    "id": uuid::Uuid::new_v4(),
                    "original_filename": "forever.mp4",
                    "storage_key": "videos/forever.mp4",
                    "duration_seconds": i64::MAX
                }],
                "subtitle_config": { "source_language": "en" }
            })),
        )
        .await;
    assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);

    let overview = app
        .request(Method::GET, "/api/dashboard/overview", Some(&token), None)
        .await;
    assert_eq!(overview.body["total_orders"], 0);
}
