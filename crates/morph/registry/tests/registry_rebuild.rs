//! Rebuilding the registry from files and live workers.

use axum::extract::Query;
use axum::routing::get;
use axum::{Json, Router};
use morph_registry::{
    ConfigSource, CoreFeature, FileConfigSource, Registry, RegistryPoller, RegistryRole, SizeLimit,
    SourceTier, WorkerConfigSource,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

fn no_options() -> BTreeMap<String, String> {
    BTreeMap::new()
}

/// Serve a worker config document; requests without `configVersion=2` get 400.
async fn fake_worker(config: serde_json::Value) -> String {
    let app = Router::new().route(
        "/transform/config",
        get(move |Query(query): Query<HashMap<String, String>>| {
            let config = config.clone();
            async move {
                if query.get("configVersion").map(String::as_str) == Some("2") {
                    Ok(Json(config))
                } else {
                    Err(axum::http::StatusCode::BAD_REQUEST)
                }
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn imagemagick_config() -> serde_json::Value {
    serde_json::json!({
        "transformOptions": {
            "imageMagickOptions": [
                {"value": {"name": "resizeWidth"}},
                {"value": {"name": "resizeHeight"}}
            ]
        },
        "transformers": [
            {
                "transformerName": "imagemagick",
                "coreVersion": "5.1.9",
                "transformOptions": ["imageMagickOptions"],
                "supportedSourceAndTargetList": [
                    {"sourceMediaType": "image/png", "targetMediaType": "image/jpeg"},
                    {"sourceMediaType": "application/pdf", "targetMediaType": "image/png", "maxSourceSizeBytes": 1000}
                ]
            }
        ]
    })
}

fn libreoffice_config() -> serde_json::Value {
    serde_json::json!({
        "transformers": [
            {
                "transformerName": "libreoffice",
                "coreVersion": "2.5.6",
                "supportedSourceAndTargetList": [
                    {"sourceMediaType": "text/plain", "targetMediaType": "application/pdf"}
                ]
            },
            {
                "transformerName": "textToImage",
                "transformerPipeline": [
                    {"transformerName": "libreoffice", "targetMediaType": "application/pdf"},
                    {"transformerName": "imagemagick"}
                ]
            }
        ]
    })
}

#[tokio::test]
async fn test_workers_and_override_files_merge() {
    let imagemagick = fake_worker(imagemagick_config()).await;
    let libreoffice = fake_worker(libreoffice_config()).await;

    let dir = tempfile::tempdir().unwrap();
    let historic = dir.path().join("historic.json");
    std::fs::write(
        &historic,
        r#"{"overrideSupported": [{"transformerName": "imagemagick",
            "sourceMediaType": "image/png", "targetMediaType": "image/jpeg",
            "maxSourceSizeBytes": 10, "priority": 20}]}"#,
    )
    .unwrap();
    let current = dir.path().join("current");
    std::fs::create_dir(&current).unwrap();
    std::fs::write(
        current.join("limits.json"),
        r#"{"overrideSupported": [{"transformerName": "imagemagick",
            "sourceMediaType": "image/png", "targetMediaType": "image/jpeg",
            "maxSourceSizeBytes": 100, "priority": 30}]}"#,
    )
    .unwrap();

    let sources: Vec<Arc<dyn ConfigSource>> = vec![
        Arc::new(FileConfigSource::new(&current, SourceTier::Current)),
        Arc::new(WorkerConfigSource::new(&imagemagick, Duration::from_secs(5)).unwrap()),
        Arc::new(FileConfigSource::new(&historic, SourceTier::Historic)),
        Arc::new(WorkerConfigSource::new(&libreoffice, Duration::from_secs(5)).unwrap()),
    ];
    let registry = Arc::new(Registry::new(RegistryRole::Router));
    let poller = RegistryPoller::new(registry.clone(), sources, Duration::from_secs(60));
    let snapshot = poller.poll_once().await;

    assert!(registry.is_ready_for_transform_requests());
    assert_eq!(snapshot.endpoint("imagemagick"), Some(imagemagick.as_str()));
    assert_eq!(snapshot.endpoint("textToImage"), None);

    // The current tier was applied last.
    let pair = snapshot
        .descriptor("imagemagick")
        .unwrap()
        .pair("image/png", "image/jpeg")
        .unwrap();
    assert_eq!(pair.priority, Some(30));
    assert!(snapshot.check_source_size("imagemagick", "image/png", 100, "image/jpeg"));
    assert!(!snapshot.check_source_size("imagemagick", "image/png", 101, "image/jpeg"));

    // Derived pipeline pairs.
    let chosen = snapshot
        .resolve("text/plain", 5, "image/png", &no_options())
        .unwrap();
    assert_eq!(chosen.name, "textToImage");
    assert_eq!(
        snapshot.find_max_size("text/plain", "image/png", &no_options()),
        Some(SizeLimit::Unlimited)
    );

    // The pipeline runs on a 2.5.6 worker, so no direct access URLs.
    assert!(snapshot.is_feature_supported("imagemagick", CoreFeature::SourceFilename));
    assert!(!snapshot.is_feature_supported("textToImage", CoreFeature::DirectAccessUrl));

    let mut resize = no_options();
    resize.insert("resizeWidth".into(), "10".into());
    assert_eq!(
        snapshot.find_transformer_name("image/png", 5, "image/jpeg", &resize),
        Some("imagemagick")
    );
}

#[tokio::test]
async fn test_unreachable_worker_leaves_registry_unready() {
    let source = WorkerConfigSource::new("http://127.0.0.1:1", Duration::from_millis(200)).unwrap();
    assert!(source.fetch().await.is_err());

    let registry = Arc::new(Registry::new(RegistryRole::Router));
    let poller = RegistryPoller::new(
        registry.clone(),
        vec![Arc::new(source) as Arc<dyn ConfigSource>],
        Duration::from_secs(60),
    );
    let snapshot = poller.poll_once().await;
    assert!(snapshot.is_empty());
    assert!(!registry.is_ready_for_transform_requests());
}

#[tokio::test]
async fn test_published_config_round_trips_through_a_worker_source() {
    let worker = fake_worker(imagemagick_config()).await;
    let registry = Arc::new(Registry::new(RegistryRole::Router));
    let poller = RegistryPoller::new(
        registry.clone(),
        vec![Arc::new(WorkerConfigSource::new(&worker, Duration::from_secs(5)).unwrap()) as Arc<dyn ConfigSource>],
        Duration::from_secs(60),
    );
    let first = poller.poll_once().await;

    // Serve the merged result from a second fake worker and merge again.
    let republished = fake_worker(serde_json::to_value(first.config(2)).unwrap()).await;
    let second = Registry::new(RegistryRole::Router);
    let source = WorkerConfigSource::new(&republished, Duration::from_secs(5)).unwrap();
    let snapshot = second.rebuild(source.fetch().await.unwrap());

    assert_eq!(
        snapshot.descriptor("imagemagick").unwrap().supported,
        first.descriptor("imagemagick").unwrap().supported
    );
    assert_eq!(
        snapshot.descriptor("imagemagick").unwrap().core_version,
        first.descriptor("imagemagick").unwrap().core_version
    );
}
