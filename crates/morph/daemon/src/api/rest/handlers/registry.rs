//! Registry handlers

use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::extract::State;
use axum::http::StatusCode;
use tokio::sync::mpsc::error::TrySendError;

/// Ask the poller for an immediate rebuild. A rebuild already queued
/// counts as accepted.
pub async fn refresh_registry(State(state): State<AppState>) -> ApiResult<StatusCode> {
    match state.refresh_tx.try_send(()) {
        Ok(()) | Err(TrySendError::Full(())) => Ok(StatusCode::ACCEPTED),
        Err(TrySendError::Closed(())) => {
            Err(ApiError::Internal("registry poller is not running".to_string()))
        }
    }
}
