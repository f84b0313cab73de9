//! The REST surface against an in-process router and a fake worker.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use morph_daemon::api::create_router;
use morph_daemon::AppState;
use morph_registry::{
    ConfigOrigin, Registry, RegistryRole, SourcedConfig, SupportedPair, TransformConfig,
    TransformerConfig,
};
use morph_router::{Router, RouterConfig, RouterResult, RetryPolicy, WorkerClient};
use morph_types::{TransformReply, TransformRequest};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tower::ServiceExt;

/// Converts anything except a source called "corrupt".
struct OfficeWorker;

#[async_trait]
impl WorkerClient for OfficeWorker {
    async fn transform(
        &self,
        _endpoint: &str,
        request: &TransformRequest,
        _timeout: Duration,
    ) -> RouterResult<TransformReply> {
        let reply = TransformReply::for_request(request);
        Ok(if request.source_reference == "corrupt" {
            reply.with_failure(400, "Transform failed - unreadable document")
        } else {
            reply.with_target(format!("{}.pdf", request.source_reference), 99)
        })
    }
}

struct Fixture {
    registry: Arc<Registry>,
    state: AppState,
    refresh_rx: mpsc::Receiver<()>,
}

fn fixture() -> Fixture {
    let registry = Arc::new(Registry::new(RegistryRole::Router));
    let router = Arc::new(Router::new(
        registry.clone(),
        Arc::new(OfficeWorker),
        RouterConfig {
            retry: RetryPolicy::none(),
            dispatch_timeout_ms: 1_000,
        },
    ));
    let (refresh_tx, refresh_rx) = mpsc::channel(1);
    let state = AppState::new(registry.clone(), router, refresh_tx);
    Fixture {
        registry,
        state,
        refresh_rx,
    }
}

fn publish(registry: &Registry) {
    registry.rebuild(vec![SourcedConfig::new(
        ConfigOrigin::worker("http://office"),
        TransformConfig {
            transformers: vec![TransformerConfig {
                transformer_name: "office".into(),
                supported_source_and_target_list: vec![SupportedPair::new(
                    "text/plain",
                    "application/pdf",
                )],
                ..Default::default()
            }],
            ..Default::default()
        },
    )]);
}

fn transform_body(source: &str, target_media_type: &str) -> Value {
    json!({
        "requestId": "",
        "sourceReference": source,
        "sourceMediaType": "text/plain",
        "sourceSize": 12,
        "targetMediaType": target_media_type,
        "targetExtension": "pdf",
        "clientData": "client-1"
    })
}

async fn call(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
    let response = create_router(state.clone(), true)
        .oneshot(request)
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_not_ready_until_first_snapshot() {
    let f = fixture();

    let (status, body) = call(&f.state, get("/api/v1/ready")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["ready"], false);

    let (status, body) = call(
        &f.state,
        post_json("/api/v1/transform", &transform_body("doc", "application/pdf")),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "NOT_READY");

    publish(&f.registry);
    let (status, body) = call(&f.state, get("/api/v1/ready")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["transformers"], 1);
}

#[tokio::test]
async fn test_transform_replies() {
    let f = fixture();
    publish(&f.registry);

    let (status, body) = call(
        &f.state,
        post_json("/api/v1/transform", &transform_body("doc", "application/pdf")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["targetReference"], "doc.pdf");
    assert_eq!(body["targetSize"], 99);
    assert_eq!(body["clientData"], "client-1");
    assert!(!body["requestId"].as_str().unwrap().is_empty());

    let (status, body) = call(
        &f.state,
        post_json("/api/v1/transform", &transform_body("corrupt", "application/pdf")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorDetails"], "Transform failed - unreadable document");
}

#[tokio::test]
async fn test_transform_rejections() {
    let f = fixture();
    publish(&f.registry);

    let (status, body) = call(
        &f.state,
        post_json("/api/v1/transform", &transform_body("doc", "image/png")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "NO_CAPABLE_WORKER");
    assert_eq!(body["details"]["targetMediaType"], "image/png");

    let mut missing = transform_body("doc", "application/pdf");
    missing["clientData"] = json!(" ");
    let (status, body) = call(&f.state, post_json("/api/v1/transform", &missing)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert_eq!(body["error"], "clientData cannot be null or empty");

    let (_, status_body) = call(&f.state, get("/api/v1/status")).await;
    assert_eq!(status_body["stats"]["requests_rejected"], 2);
    assert_eq!(status_body["stats"]["requests_total"], 2);
}

#[tokio::test]
async fn test_status_and_config() {
    let f = fixture();
    publish(&f.registry);
    call(
        &f.state,
        post_json("/api/v1/transform", &transform_body("doc", "application/pdf")),
    )
    .await;

    let (status, body) = call(&f.state, get("/api/v1/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["stats"]["role"], "router");
    assert_eq!(body["stats"]["transformers"], 1);
    assert_eq!(body["stats"]["worker_descriptors"], 1);
    assert_eq!(body["stats"]["requests_succeeded"], 1);

    let (status, body) = call(&f.state, get("/api/v1/transform/config?configVersion=2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["transformers"][0]["transformerName"], "office");

    let (status, body) = call(&f.state, get("/api/v1/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, _) = call(&f.state, get("/api/v1/live")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_registry_refresh() {
    let mut f = fixture();
    let refresh = Request::post("/api/v1/registry/refresh")
        .body(Body::empty())
        .unwrap();
    let (status, _) = call(&f.state, refresh).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(f.refresh_rx.recv().await, Some(()));

    drop(f.refresh_rx);
    let refresh = Request::post("/api/v1/registry/refresh")
        .body(Body::empty())
        .unwrap();
    let (status, body) = call(&f.state, refresh).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "INTERNAL_ERROR");
}
