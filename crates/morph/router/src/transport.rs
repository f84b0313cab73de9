//! Sending a hop to a worker over HTTP

use crate::error::{RouterError, RouterResult};
use async_trait::async_trait;
use morph_types::envelope::status;
use morph_types::{TransformReply, TransformRequest};
use std::time::Duration;

/// Path a worker serves transform requests on.
pub const TRANSFORM_PATH: &str = "/transform";

#[async_trait]
pub trait WorkerClient: Send + Sync {
    /// Send `request` to the worker at `endpoint` and wait for its reply.
    ///
    /// Err means nothing usable came back; the caller treats it as a
    /// transient failure of the step.
    async fn transform(
        &self,
        endpoint: &str,
        request: &TransformRequest,
        timeout: Duration,
    ) -> RouterResult<TransformReply>;
}

#[derive(Debug, Clone, Default)]
pub struct HttpWorkerClient {
    client: reqwest::Client,
}

impl HttpWorkerClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WorkerClient for HttpWorkerClient {
    async fn transform(
        &self,
        endpoint: &str,
        request: &TransformRequest,
        timeout: Duration,
    ) -> RouterResult<TransformReply> {
        let url = format!("{}{}", endpoint.trim_end_matches('/'), TRANSFORM_PATH);
        let response = self
            .client
            .post(&url)
            .json(request)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| RouterError::dispatch(endpoint, e))?;

        let code = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| RouterError::dispatch(endpoint, e))?;

        match serde_json::from_slice::<TransformReply>(&body) {
            Ok(reply) => Ok(reply),
            // A worker that rejected the request without a reply envelope.
            Err(e) if (400..500).contains(&code) => {
                tracing::debug!(endpoint, code, error = %e, "Worker reply has no envelope");
                Ok(TransformReply::for_request(request).with_failure(
                    status::BAD_REQUEST,
                    String::from_utf8_lossy(&body).into_owned(),
                ))
            }
            Err(e) => Err(RouterError::dispatch(
                endpoint,
                format!("HTTP {} with unreadable reply: {}", code, e),
            )),
        }
    }
}
