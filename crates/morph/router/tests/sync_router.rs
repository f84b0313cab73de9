//! Walking plans synchronously against scripted workers.

use async_trait::async_trait;
use morph_registry::{
    ConfigOrigin, PipelineStep, Registry, RegistryRole, SourcedConfig, SupportedPair,
    TransformConfig, TransformerConfig,
};
use morph_router::{
    HttpWorkerClient, RecordingArtifactStore, RetryPolicy, Router, RouterConfig, RouterError,
    RouterResult, WorkerClient,
};
use morph_types::{TransformReply, TransformRequest};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Behaviour = Box<dyn Fn(&TransformRequest, usize) -> RouterResult<TransformReply> + Send + Sync>;

/// Answers from per-endpoint closures and logs every call.
#[derive(Default)]
struct ScriptedClient {
    behaviours: HashMap<String, Behaviour>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedClient {
    fn on(
        mut self,
        worker: &str,
        behaviour: impl Fn(&TransformRequest, usize) -> RouterResult<TransformReply> + Send + Sync + 'static,
    ) -> Self {
        self.behaviours.insert(endpoint(worker), Box::new(behaviour));
        self
    }

    /// (worker endpoint, stack reference) per call, in order.
    fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    fn workers(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|(e, _)| e.trim_start_matches("http://").to_string())
            .collect()
    }
}

#[async_trait]
impl WorkerClient for ScriptedClient {
    async fn transform(
        &self,
        endpoint: &str,
        request: &TransformRequest,
        _timeout: Duration,
    ) -> RouterResult<TransformReply> {
        let attempt = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((endpoint.to_string(), request.stack.reference()));
            calls.iter().filter(|(e, _)| e == endpoint).count()
        };
        let behaviour = self
            .behaviours
            .get(endpoint)
            .expect("no behaviour for endpoint");
        behaviour(request, attempt)
    }
}

fn endpoint(worker: &str) -> String {
    format!("http://{}", worker)
}

fn succeed(target: &'static str) -> impl Fn(&TransformRequest, usize) -> RouterResult<TransformReply> {
    move |request, _| Ok(TransformReply::for_request(request).with_target(target, 42))
}

fn fail(status: u16, message: &'static str) -> impl Fn(&TransformRequest, usize) -> RouterResult<TransformReply> {
    move |request, _| Ok(TransformReply::for_request(request).with_failure(status, message))
}

fn leaf(name: &str, source: &str, target: &str) -> SourcedConfig {
    SourcedConfig::new(
        ConfigOrigin::worker(endpoint(name)),
        TransformConfig {
            transformers: vec![TransformerConfig {
                transformer_name: name.into(),
                supported_source_and_target_list: vec![SupportedPair::new(source, target)],
                ..Default::default()
            }],
            ..Default::default()
        },
    )
}

fn composites(transformers: Vec<TransformerConfig>) -> SourcedConfig {
    SourcedConfig::new(
        ConfigOrigin::worker("http://composites"),
        TransformConfig {
            transformers,
            ..Default::default()
        },
    )
}

fn pipeline(name: &str, steps: &[(&str, Option<&str>)]) -> TransformerConfig {
    TransformerConfig {
        transformer_name: name.into(),
        transformer_pipeline: steps
            .iter()
            .map(|(worker, target)| PipelineStep::new(*worker, *target))
            .collect(),
        ..Default::default()
    }
}

fn failover(name: &str, workers: &[&str]) -> TransformerConfig {
    TransformerConfig {
        transformer_name: name.into(),
        transformer_failover: workers.iter().map(|w| w.to_string()).collect(),
        ..Default::default()
    }
}

/// A2B and B2C chained as A2C; X, Y and Z as failover XYZ for x/x to c/c.
fn registry() -> Arc<Registry> {
    let registry = Arc::new(Registry::new(RegistryRole::Router));
    registry.rebuild(vec![
        leaf("A", "a/a", "b/b"),
        leaf("B", "b/b", "c/c"),
        leaf("X", "x/x", "c/c"),
        leaf("Y", "x/x", "c/c"),
        leaf("Z", "x/x", "c/c"),
        leaf("P", "p/p", "x/x"),
        composites(vec![
            pipeline("A2C", &[("A", Some("b/b")), ("B", None)]),
            failover("XYZ", &["X", "Y", "Z"]),
            pipeline("P2C", &[("P", Some("x/x")), ("XYZ", None)]),
        ]),
    ]);
    registry
}

fn request(source: &str, target: &str) -> TransformRequest {
    serde_json::from_value(serde_json::json!({
        "requestId": "req-1",
        "sourceReference": "src",
        "sourceMediaType": source,
        "sourceSize": 100,
        "sourceExtension": "a",
        "targetMediaType": target,
        "targetExtension": "c",
        "clientData": "client-data"
    }))
    .unwrap()
}

fn config(max_retries: u32) -> RouterConfig {
    RouterConfig {
        retry: RetryPolicy {
            max_retries,
            backoff_base_ms: 1,
            backoff_max_ms: 5,
        },
        dispatch_timeout_ms: 1_000,
    }
}

#[tokio::test]
async fn test_pipeline_success() {
    let client = Arc::new(
        ScriptedClient::default()
            .on("A", succeed("mid"))
            .on("B", succeed("out")),
    );
    let store = Arc::new(RecordingArtifactStore::new());
    let router = Router::new(registry(), client.clone(), config(0)).with_store(store.clone());

    let reply = router.transform(request("a/a", "c/c")).await.unwrap();
    assert_eq!(reply.status, 201);
    assert_eq!(reply.target_reference.as_deref(), Some("out"));
    assert_eq!(reply.source_reference.as_deref(), Some("src"));
    assert_eq!(reply.client_data, "client-data");

    assert_eq!(
        client.calls(),
        vec![
            ("http://A".to_string(), "e1".to_string()),
            ("http://B".to_string(), "e2".to_string()),
        ]
    );
    assert_eq!(store.released(), vec!["mid".to_string(), "src".to_string()]);
}

#[tokio::test]
async fn test_pipeline_failure_skips_remaining_steps() {
    let client = Arc::new(
        ScriptedClient::default()
            .on("A", fail(400, "Transform failed - unreadable"))
            .on("B", succeed("out")),
    );
    let router = Router::new(registry(), client.clone(), config(2));

    let reply = router.transform(request("a/a", "c/c")).await.unwrap();
    assert_eq!(reply.status, 400);
    assert_eq!(reply.error_details.as_deref(), Some("Transform failed - unreadable"));
    assert_eq!(reply.source_reference.as_deref(), Some("src"));
    assert_eq!(client.workers(), vec!["A"]);
}

#[tokio::test]
async fn test_failover_stops_at_first_success() {
    let client = Arc::new(
        ScriptedClient::default()
            .on("X", fail(400, "x cannot"))
            .on("Y", succeed("out"))
            .on("Z", succeed("never")),
    );
    let router = Router::new(registry(), client.clone(), config(0));

    let reply = router.transform(request("x/x", "c/c")).await.unwrap();
    assert_eq!(reply.status, 201);
    assert_eq!(reply.target_reference.as_deref(), Some("out"));
    assert_eq!(client.workers(), vec!["X", "Y"]);
}

#[tokio::test]
async fn test_exhausted_failover_reports_last_error() {
    let client = Arc::new(
        ScriptedClient::default()
            .on("X", fail(400, "x cannot"))
            .on("Y", fail(400, "y cannot"))
            .on("Z", fail(400, "z cannot")),
    );
    let router = Router::new(registry(), client.clone(), config(0));

    let reply = router.transform(request("x/x", "c/c")).await.unwrap();
    assert_eq!(reply.status, 400);
    assert_eq!(reply.error_details.as_deref(), Some("z cannot"));
    assert_eq!(client.workers(), vec!["X", "Y", "Z"]);
}

#[tokio::test]
async fn test_nested_failover_inside_pipeline() {
    let client = Arc::new(
        ScriptedClient::default()
            .on("P", succeed("x-file"))
            .on("X", fail(400, "x cannot"))
            .on("Y", succeed("out"))
            .on("Z", succeed("never")),
    );
    let router = Router::new(registry(), client.clone(), config(0));

    let reply = router.transform(request("p/p", "c/c")).await.unwrap();
    assert_eq!(reply.status, 201);
    let references: Vec<String> = client.calls().into_iter().map(|(_, r)| r).collect();
    assert_eq!(references, vec!["e1", "e2.1", "e2.2"]);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let client = Arc::new(ScriptedClient::default().on("B", |request, attempt| {
        if attempt < 3 {
            Ok(TransformReply::for_request(request).with_failure(500, "busy"))
        } else {
            Ok(TransformReply::for_request(request).with_target("out", 1))
        }
    }));
    let router = Router::new(registry(), client.clone(), config(3));

    let reply = router.transform(request("b/b", "c/c")).await.unwrap();
    assert_eq!(reply.status, 201);
    assert_eq!(client.workers(), vec!["B", "B", "B"]);
}

#[tokio::test]
async fn test_unreachable_worker_fails_after_retries() {
    let client = Arc::new(
        ScriptedClient::default()
            .on("B", |_, _| Err(RouterError::dispatch("B", "connection refused"))),
    );
    let router = Router::new(registry(), client.clone(), config(2));

    let reply = router.transform(request("b/b", "c/c")).await.unwrap();
    assert_eq!(reply.status, 500);
    assert!(reply.error_details.unwrap().contains("connection refused"));
    assert_eq!(client.calls().len(), 3);
}

#[tokio::test]
async fn test_no_capable_worker() {
    let client = Arc::new(ScriptedClient::default());
    let router = Router::new(registry(), client.clone(), config(0));

    let err = router.transform(request("q/q", "c/c")).await.unwrap_err();
    assert!(matches!(err, RouterError::Resolution(_)));
    assert!(client.calls().is_empty());
}

#[tokio::test]
async fn test_invalid_request() {
    let router = Router::new(registry(), Arc::new(ScriptedClient::default()), config(0));
    let mut req = request("a/a", "c/c");
    req.target_extension.clear();
    let err = router.transform(req).await.unwrap_err();
    assert_eq!(err.to_string(), "targetExtension cannot be null or empty");
}

#[tokio::test]
async fn test_http_worker_round_trip() {
    use axum::routing::post;
    use axum::Json;

    let app = axum::Router::new().route(
        "/transform",
        post(|Json(request): Json<TransformRequest>| async move {
            Json(TransformReply::for_request(&request).with_target("http-out", 9))
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let registry = Arc::new(Registry::new(RegistryRole::Router));
    registry.rebuild(vec![SourcedConfig::new(
        ConfigOrigin::worker(&url),
        TransformConfig {
            transformers: vec![TransformerConfig {
                transformer_name: "remote".into(),
                supported_source_and_target_list: vec![SupportedPair::new("a/a", "c/c")],
                ..Default::default()
            }],
            ..Default::default()
        },
    )]);

    let router = Router::new(registry, Arc::new(HttpWorkerClient::new()), config(0));
    let reply = router.transform(request("a/a", "c/c")).await.unwrap();
    assert_eq!(reply.status, 201);
    assert_eq!(reply.target_reference.as_deref(), Some("http-out"));
    assert_eq!(reply.target_size, Some(9));
}
