//! Health and status handlers

use crate::api::rest::state::AppState;
use axum::{extract::State, http::StatusCode, Json};
use morph_registry::RegistryRole;
use serde::Serialize;

/// Liveness probe
pub async fn live() -> &'static str {
    "Success - alive"
}

/// Readiness response
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub transformers: usize,
}

/// 200 once the registry has published a snapshot, 503 before.
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let ready = state.registry.is_ready_for_transform_requests();
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadyResponse {
            ready,
            transformers: state.registry.snapshot().len(),
        }),
    )
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        uptime: state.uptime(),
    })
}

/// Daemon status response
#[derive(Debug, Serialize)]
pub struct DaemonStatusResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub stats: DaemonStats,
}

/// Daemon statistics
#[derive(Debug, Serialize)]
pub struct DaemonStats {
    pub role: RegistryRole,
    pub ready: bool,
    pub transformers: usize,
    pub worker_descriptors: usize,
    pub snapshot_built_at: chrono::DateTime<chrono::Utc>,
    pub requests_total: u64,
    pub requests_succeeded: u64,
    pub requests_failed: u64,
    pub requests_rejected: u64,
}

/// Daemon status endpoint
pub async fn daemon_status(State(state): State<AppState>) -> Json<DaemonStatusResponse> {
    let snapshot = state.registry.snapshot();
    let ready = state.registry.is_ready_for_transform_requests();

    Json(DaemonStatusResponse {
        status: if ready { "healthy" } else { "starting" }.to_string(),
        version: state.version.clone(),
        uptime: state.uptime(),
        started_at: state.started_at,
        stats: DaemonStats {
            role: snapshot.role(),
            ready,
            transformers: snapshot.len(),
            worker_descriptors: snapshot.worker_descriptor_count(),
            snapshot_built_at: snapshot.built_at(),
            requests_total: state.stats.total(),
            requests_succeeded: state.stats.succeeded(),
            requests_failed: state.stats.failed(),
            requests_rejected: state.stats.rejected(),
        },
    })
}
