//! Admin route integration tests
//!
//! Requests go through the full router, including the admin token layer.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use collabcore::backend::routes::create_router;
use collabcore::backend::server::AppState;
use collabcore::backend::services::{CollabServices, ServiceBackends};
use collabcore::shared::CollabConfig;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use crate::common::{connect, services, ADMIN_TOKEN};

fn router(services: &Arc<CollabServices>) -> Router {
    create_router(AppState::new(services.clone(), None))
}

fn admin_request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", ADMIN_TOKEN));
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_needs_no_token() {
    let services = services("admin-health").await;

    let response = router(&services)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_admin_routes_reject_missing_or_wrong_token() {
    let services = services("admin-reject").await;

    let response = router(&services)
        .oneshot(Request::get("/admin/stats").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = router(&services)
        .oneshot(
            Request::get("/admin/stats")
                .header("x-admin-token", "guess")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_admin_routes_disabled_without_configured_token() {
    let config = CollabConfig::builder()
        .instance_id("admin-disabled")
        .build()
        .unwrap();
    let services = CollabServices::new(config, ServiceBackends::in_memory()).await;

    let response = router(&services)
        .oneshot(admin_request(Method::GET, "/admin/stats", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_stats_report_every_component() {
    let services = services("admin-stats").await;
    connect(&services, "alice", Some("p1")).await;

    let response = router(&services)
        .oneshot(admin_request(Method::GET, "/admin/stats", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["registry"]["total_connections"], 1);
    assert_eq!(body["relay"]["instance_id"], "admin-stats");
    assert!(body["presence"].is_object());
    assert!(body["detector"].is_object());
}

#[tokio::test]
async fn test_broadcast_reaches_project_connections() {
    let services = services("admin-broadcast").await;
    let (_, alice) = connect(&services, "alice", Some("p1")).await;
    let (_, bob) = connect(&services, "bob", Some("p2")).await;

    let response = router(&services)
        .oneshot(admin_request(
            Method::POST,
            "/admin/broadcast",
            Some(json!({ "content": "deploy freeze", "project_id": "p1" })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["delivered"], 1);
    assert_eq!(alice.of_type("broadcast").len(), 1);
    assert!(bob.of_type("broadcast").is_empty());
}

#[tokio::test]
async fn test_unknown_user_activity_is_not_found() {
    let services = services("admin-activity").await;

    let response = router(&services)
        .oneshot(admin_request(Method::GET, "/admin/users/ghost/activity", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cleanup_reports_counts() {
    let services = services("admin-cleanup").await;

    let response = router(&services)
        .oneshot(admin_request(Method::POST, "/admin/cleanup", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["stale_connections"], 0);
    assert_eq!(body["sessions_removed"], 0);
}

#[tokio::test]
async fn test_project_conflicts_include_history() {
    let services = services("admin-conflicts").await;

    let response = router(&services)
        .oneshot(admin_request(Method::GET, "/admin/projects/p1/conflicts?days=3", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["project_id"], "p1");
    assert_eq!(body["history"]["period_days"], 3);
    assert_eq!(body["conflicts"], json!([]));
}
