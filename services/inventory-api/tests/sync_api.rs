//! Router-level tests that need no database.
//!
//! The pool points at a closed port, so anything reaching the store sees it
//! as unavailable.

use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use fleetsync_id::{MachineId, TenantId};
use fleetsync_server::{
    api,
    config::SyncConfig,
    db::{Database, DbConfig},
    state::AppState,
};
use serde_json::{json, Value};
use tower::ServiceExt;

fn app() -> Router {
    let config = DbConfig {
        database_url: "postgres://nobody@127.0.0.1:1/none".to_string(),
        min_connections: 0,
        acquire_timeout: Duration::from_millis(200),
        ..Default::default()
    };
    let db = Database::connect_lazy(&config).unwrap();
    api::create_router(AppState::new(db, SyncConfig::default(), "test"))
}

async fn send(request: Request<Body>) -> (StatusCode, Value) {
    let response = app().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-request-id", "req-from-agent")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_status_reports_environment() {
    let (status, body) = send(Request::get("/v1/status").body(Body::empty()).unwrap()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "online");
    assert_eq!(body["environment"], "test");
}

#[tokio::test]
async fn test_sync_missing_fields_is_400() {
    let (status, body) = send(post_json(
        "/v1/components/sync",
        &json!({ "tenantId": TenantId::new().to_string(), "components": [] }).to_string(),
    ))
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "validation_error");
    assert_eq!(body["requestId"], "req-from-agent");
    assert!(body["errorDetail"]
        .as_str()
        .unwrap()
        .contains("machineId is required"));
}

#[tokio::test]
async fn test_sync_malformed_json_is_400() {
    let (status, body) = send(post_json("/v1/components/sync", "{not json")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "validation_error");
}

#[tokio::test]
async fn test_sync_with_unreachable_store_is_503() {
    let (status, body) = send(post_json(
        "/v1/components/sync",
        &json!({
            "machineId": MachineId::new().to_string(),
            "tenantId": TenantId::new().to_string(),
            "components": [{"name": "cpu", "type": "x86", "description": null}],
        })
        .to_string(),
    ))
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "store_unavailable");
    assert_eq!(body["retryable"], true);
}

#[tokio::test]
async fn test_invalid_machine_id_is_problem_details() {
    let response = app()
        .oneshot(
            Request::get("/v1/machines/not-an-id/components")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/problem+json"
    );
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["code"], "invalid_machine_id");
}

#[tokio::test]
async fn test_registration_validation_lists_fields() {
    let (status, body) = send(post_json(
        "/v1/machines",
        &json!({ "hostname": "web-01", "tenantId": "bogus" }).to_string(),
    ))
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_machine");
    assert_eq!(body["request_id"], "req-from-agent");
    let fields: Vec<&str> = body["details"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["field"].as_str().unwrap())
        .collect();
    assert_eq!(fields, vec!["macAddress", "hardwareId", "tenantId"]);
}

#[tokio::test]
async fn test_component_view_with_unreachable_store_is_503() {
    let uri = format!("/v1/machines/{}/components", MachineId::new());
    let (status, body) = send(Request::get(uri.as_str()).body(Body::empty()).unwrap()).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "store_unavailable");
    assert_eq!(body["retryable"], true);
}
