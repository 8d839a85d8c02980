//! HTTP routes via `oneshot`

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use shipyard::app::options::ServerOptions;
use shipyard::backend::BackendFamily;
use shipyard::server::serve::router;
use shipyard::server::state::ServerState;
use tower::ServiceExt;

use crate::common::{harness, Harness};

fn app(h: &Harness) -> Router {
    app_with(h, &ServerOptions::default())
}

fn app_with(h: &Harness, options: &ServerOptions) -> Router {
    router(options, Arc::new(ServerState::new(h.orchestrator.clone())))
}

fn request(method: Method, uri: &str, owner: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(owner) = owner {
        builder = builder.header("x-owner-id", owner);
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn test_health_and_version() {
    let h = harness(BackendFamily::Platform);
    let (status, body) = send(app(&h), request(Method::GET, "/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = send(app(&h), request(Method::GET, "/version", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["gitHash"].is_string());
}

#[tokio::test]
async fn test_missing_owner_is_unauthorized() {
    let h = harness(BackendFamily::Platform);
    let (status, body) = send(
        app(&h),
        request(Method::GET, "/deploy/status?appName=acme", None, None),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_prepare_push_status_logs() {
    let h = harness(BackendFamily::Platform);

    let (status, body) = send(
        app(&h),
        request(Method::GET, "/deploy/status?appName=acme", Some("u1"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "data": { "status": "not_found" } }));

    let (status, body) = send(
        app(&h),
        request(
            Method::POST,
            "/deploy/prepare",
            Some("u1"),
            Some(json!({ "appName": "acme" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["resourceName"], "shipyard-1");
    assert_eq!(body["data"]["resourceUrl"], "https://shipyard-1.mock.test");

    let push = json!({
        "appName": "acme",
        "archive": STANDARD.encode(b"tarball"),
        "envVars": { "PORT": "3000" }
    });
    let (status, body) = send(
        app(&h),
        request(Method::POST, "/deploy/push", Some("u1"), Some(push.clone())),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "data": { "status": "building" } }));

    let (status, body) = send(
        app(&h),
        request(Method::POST, "/deploy/push", Some("u1"), Some(push)),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("already in progress"));

    let (status, body) = send(
        app(&h),
        request(Method::GET, "/deploy/status?appName=acme", Some("u1"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "building");
    assert_eq!(body["data"]["message"], "Building...");

    h.backend
        .complete_build("shipyard-1", 0, "Creating release v2\n")
        .await;
    let (status, body) = send(
        app(&h),
        request(Method::GET, "/deploy/logs?appName=acme", Some("u1"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["buildLog"], "Creating release v2\n");
    assert_eq!(body["data"]["serviceLogs"], Value::Null);
}

#[tokio::test]
async fn test_validation_and_not_found() {
    let h = harness(BackendFamily::Platform);

    let (status, body) = send(
        app(&h),
        request(Method::POST, "/deploy/prepare", Some("u1"), Some(json!({}))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("appName is required"));

    let (status, body) = send(
        app(&h),
        request(
            Method::POST,
            "/deploy/push",
            Some("u1"),
            Some(json!({ "appName": "acme" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("appName and archive are required"));

    let (status, _) = send(
        app(&h),
        request(
            Method::POST,
            "/deploy/push",
            Some("u1"),
            Some(json!({ "appName": "acme", "archive": STANDARD.encode(b"x") })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        app(&h),
        request(Method::GET, "/deploy/logs?appName=acme", Some("u1"), None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        app(&h),
        request(Method::GET, "/deploy/status", Some("u1"), None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_stream_rejects_bad_input_before_streaming() {
    let h = harness(BackendFamily::Platform);
    let (status, body) = send(
        app(&h),
        request(
            Method::POST,
            "/deploy/stream",
            Some("u1"),
            Some(json!({ "appName": "acme", "archive": "%%%" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("base64"));
}

#[tokio::test]
async fn test_push_accepts_archives_over_two_mebibytes() {
    let h = harness(BackendFamily::Platform);
    let (status, _) = send(
        app(&h),
        request(
            Method::POST,
            "/deploy/prepare",
            Some("u1"),
            Some(json!({ "appName": "acme" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let archive = vec![7u8; 3 * 1024 * 1024];
    let push = json!({ "appName": "acme", "archive": STANDARD.encode(&archive) });
    let (status, body) = send(
        app(&h),
        request(Method::POST, "/deploy/push", Some("u1"), Some(push)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "building");
    assert_eq!(
        h.backend
            .file("shipyard-1", shipyard::backend::ARCHIVE_PATH)
            .unwrap()
            .len(),
        archive.len()
    );
}

#[tokio::test]
async fn test_body_limit_is_configurable() {
    let h = harness(BackendFamily::Platform);
    let options = ServerOptions {
        max_body_bytes: 1024,
        ..Default::default()
    };
    let push = json!({ "appName": "acme", "archive": STANDARD.encode(vec![0u8; 4096]) });
    let (status, _) = send(
        app_with(&h, &options),
        request(Method::POST, "/deploy/push", Some("u1"), Some(push)),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}
