//! Synchronous routing: one client request walked to completion over HTTP

use crate::error::RouterResult;
use crate::orchestrator::{Advance, Decision, Hop, Orchestrator};
use crate::retry::RetryPolicy;
use crate::store::{ArtifactStore, NoopArtifactStore};
use crate::transport::WorkerClient;
use morph_registry::Registry;
use morph_types::envelope::status;
use morph_types::{TransformReply, TransformRequest};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Reference of the outermost level for requests entering over HTTP.
pub const HTTP_ENTRY_REFERENCE: &str = "e1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RouterConfig {
    pub retry: RetryPolicy,
    /// How long one worker gets to answer one hop.
    pub dispatch_timeout_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            dispatch_timeout_ms: 120_000,
        }
    }
}

impl RouterConfig {
    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }
}

pub struct Router {
    registry: Arc<Registry>,
    client: Arc<dyn WorkerClient>,
    store: Arc<dyn ArtifactStore>,
    orchestrator: Orchestrator,
    dispatch_timeout: Duration,
}

impl Router {
    pub fn new(registry: Arc<Registry>, client: Arc<dyn WorkerClient>, config: RouterConfig) -> Self {
        Self {
            registry,
            client,
            store: Arc::new(NoopArtifactStore),
            orchestrator: Orchestrator::new(config.retry),
            dispatch_timeout: config.dispatch_timeout(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = store;
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Run `request` to its terminal reply.
    ///
    /// Err is returned only when the request is invalid or nothing can
    /// perform it. Once a plan exists, every outcome is a reply.
    pub async fn transform(&self, request: TransformRequest) -> RouterResult<TransformReply> {
        let snapshot = self.registry.snapshot();
        let (context, mut advance) =
            self.orchestrator
                .begin(&request, &snapshot, Some(HTTP_ENTRY_REFERENCE))?;

        loop {
            let Advance {
                decision,
                releasable,
            } = advance;
            self.release(releasable).await;

            let hop = match decision {
                Decision::Done(reply) => {
                    tracing::info!(
                        request_id = %reply.request_id,
                        status = reply.status,
                        target = reply.target_reference.as_deref().unwrap_or(""),
                        "Transform finished"
                    );
                    return Ok(reply);
                }
                Decision::Dispatch(hop) => hop,
                Decision::Retry { hop, delay } => {
                    tokio::time::sleep(delay).await;
                    hop
                }
            };

            let reply = self.send(&hop).await;
            advance = self
                .orchestrator
                .on_reply(&context, &hop.request, &reply, &snapshot)?;
        }
    }

    /// Dispatch one hop. Transport problems become a transient failure reply.
    async fn send(&self, hop: &Hop) -> TransformReply {
        let Some(endpoint) = hop.endpoint.as_deref() else {
            return TransformReply::for_request(&hop.request).with_failure(
                status::INTERNAL_SERVER_ERROR,
                format!("No endpoint known for {}", hop.worker),
            );
        };
        match self
            .client
            .transform(endpoint, &hop.request, self.dispatch_timeout)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(worker = %hop.worker, endpoint, error = %e, "Dispatch failed");
                TransformReply::for_request(&hop.request)
                    .with_failure(status::INTERNAL_SERVER_ERROR, e.to_string())
            }
        }
    }

    async fn release(&self, references: Vec<String>) {
        for reference in references {
            self.store.release(&reference).await;
        }
    }
}
