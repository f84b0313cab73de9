//! Worker HTTP surface

use crate::handler::RequestHandler;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use morph_registry::TransformConfig;
use morph_types::{TransformReply, TransformRequest};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigQuery {
    #[serde(default = "default_config_version")]
    pub config_version: u32,
}

fn default_config_version() -> u32 {
    1
}

/// `POST /transform`, `GET /transform/config` and `GET /live`.
pub fn worker_routes(handler: Arc<RequestHandler>) -> Router {
    Router::new()
        .route("/transform", post(transform))
        .route("/transform/config", get(config))
        .route("/live", get(live))
        .with_state(handler)
}

/// The HTTP status mirrors the reply status.
async fn transform(
    State(handler): State<Arc<RequestHandler>>,
    Json(request): Json<TransformRequest>,
) -> (StatusCode, Json<TransformReply>) {
    let reply = handler.handle(request).await;
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(reply))
}

async fn config(
    State(handler): State<Arc<RequestHandler>>,
    Query(query): Query<ConfigQuery>,
) -> Json<TransformConfig> {
    Json(handler.config(query.config_version))
}

async fn live() -> &'static str {
    "Success - alive"
}
