//! Transform handlers

use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use morph_registry::TransformConfig;
use morph_types::{RequestId, TransformReply, TransformRequest};
use serde::Deserialize;

/// Config format requested by a caller
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigQuery {
    #[serde(default = "default_config_version")]
    pub config_version: u32,
}

fn default_config_version() -> u32 {
    1
}

/// Run a request through the router and return its terminal reply.
/// The HTTP status mirrors the reply status.
pub async fn transform(
    State(state): State<AppState>,
    Json(mut request): Json<TransformRequest>,
) -> ApiResult<(StatusCode, Json<TransformReply>)> {
    if !state.registry.is_ready_for_transform_requests() {
        state.stats.record_rejection();
        return Err(ApiError::NotReady);
    }
    if request.request_id.as_str().trim().is_empty() {
        request.request_id = RequestId::generate();
    }

    let reply = state.router.transform(request).await.map_err(|e| {
        state.stats.record_rejection();
        tracing::info!(error = %e, "Transform request rejected");
        ApiError::from(e)
    })?;
    state.stats.record_reply(reply.is_success());

    let status = StatusCode::from_u16(reply.status).map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok((status, Json(reply)))
}

/// The merged capability config in the requested format.
pub async fn transform_config(
    State(state): State<AppState>,
    Query(query): Query<ConfigQuery>,
) -> Json<TransformConfig> {
    Json(state.registry.snapshot().config(query.config_version))
}
