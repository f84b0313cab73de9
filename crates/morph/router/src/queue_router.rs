//! Queue-mode routing
//!
//! Hops travel as messages. Every dispatched hop is recorded in a pending
//! set keyed by request id together with the exact request sent, so a
//! reply can be matched, a retry rebuilt, and an overdue hop detected. A
//! reply for a request that is not pending (cancelled, finished, or owned
//! by another instance) is discarded.

use crate::error::{RouterError, RouterResult};
use crate::orchestrator::{Advance, Decision, Hop, Orchestrator};
use crate::plan::RequestContext;
use crate::queue::{MessageQueue, QueueMessage};
use crate::router::RouterConfig;
use crate::store::{ArtifactStore, NoopArtifactStore};
use dashmap::DashMap;
use morph_registry::Registry;
use morph_types::envelope::status;
use morph_types::{RequestId, StackError, TransformReply, TransformRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Resolves with the terminal reply of a submitted request.
pub type Completion = oneshot::Receiver<RouterResult<TransformReply>>;

struct Pending {
    context: RequestContext,
    in_flight: TransformRequest,
    deadline: Instant,
    /// A reply for `in_flight` is being applied.
    advancing: bool,
    completion: Option<oneshot::Sender<RouterResult<TransformReply>>>,
}

struct Inner {
    registry: Arc<Registry>,
    queue: Arc<dyn MessageQueue>,
    store: Arc<dyn ArtifactStore>,
    orchestrator: Orchestrator,
    reply_queue: String,
    dispatch_timeout: Duration,
    pending: DashMap<RequestId, Pending>,
}

#[derive(Clone)]
pub struct QueueRouter {
    inner: Arc<Inner>,
}

impl QueueRouter {
    pub fn new(
        registry: Arc<Registry>,
        queue: Arc<dyn MessageQueue>,
        reply_queue: impl Into<String>,
        config: RouterConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                queue,
                store: Arc::new(NoopArtifactStore),
                orchestrator: Orchestrator::new(config.retry),
                reply_queue: reply_queue.into(),
                dispatch_timeout: config.dispatch_timeout(),
                pending: DashMap::new(),
            }),
        }
    }

    /// Replace the artifact store. Must be called before the router is cloned.
    pub fn with_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.store = store;
        }
        self
    }

    pub fn reply_queue(&self) -> &str {
        &self.inner.reply_queue
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn is_pending(&self, request_id: &RequestId) -> bool {
        self.inner.pending.contains_key(request_id)
    }

    /// The request currently dispatched for `request_id`, as sent.
    pub fn in_flight(&self, request_id: &RequestId) -> Option<TransformRequest> {
        self.inner
            .pending
            .get(request_id)
            .map(|pending| pending.in_flight.clone())
    }

    /// Start a client request. Validation and resolution errors are
    /// returned directly; everything later arrives through the completion.
    pub async fn submit(&self, request: TransformRequest) -> RouterResult<Completion> {
        if self.is_pending(&request.request_id) {
            return Err(RouterError::Duplicate(request.request_id));
        }
        let snapshot = self.inner.registry.snapshot();
        let (context, advance) = self.inner.orchestrator.begin(&request, &snapshot, None)?;
        let (tx, rx) = oneshot::channel();
        self.drive(context, advance, Some(tx)).await;
        Ok(rx)
    }

    /// Take over a request another instance dispatched, given the request
    /// it last sent. The worker's reply must reach this instance's reply
    /// queue, so the hop is sent again.
    pub async fn resume(&self, in_flight: TransformRequest) -> RouterResult<Completion> {
        in_flight.validate_for_worker()?;
        if self.is_pending(&in_flight.request_id) {
            return Err(RouterError::Duplicate(in_flight.request_id));
        }
        let step = in_flight
            .stack
            .current_step()
            .ok_or(StackError::NoLiveLevel)?
            .clone();
        tracing::info!(
            request_id = %in_flight.request_id,
            worker = %step.worker_name(),
            reference = %in_flight.stack.reference(),
            "Resuming in-flight request"
        );

        let context = RequestContext::from_in_flight(&in_flight);
        let hop = Hop {
            worker: step.worker_name().to_string(),
            endpoint: None,
            request: in_flight,
        };
        let advance = Advance {
            decision: Decision::Dispatch(hop),
            releasable: Vec::new(),
        };
        let (tx, rx) = oneshot::channel();
        self.drive(context, advance, Some(tx)).await;
        Ok(rx)
    }

    /// Stop tracking a request. Its completion resolves with
    /// [`RouterError::Cancelled`] and any later reply is discarded.
    pub fn cancel(&self, request_id: &RequestId) -> bool {
        match self.inner.pending.remove(request_id) {
            Some((_, pending)) => {
                tracing::info!(request_id = %request_id, "Request cancelled");
                if let Some(tx) = pending.completion {
                    let _ = tx.send(Err(RouterError::Cancelled(request_id.clone())));
                }
                true
            }
            None => false,
        }
    }

    /// Apply a worker reply.
    pub async fn handle_reply(&self, reply: TransformReply) {
        let claimed = match self.inner.pending.get_mut(&reply.request_id) {
            None => {
                tracing::debug!(request_id = %reply.request_id, "Discarding reply for a request that is not pending");
                None
            }
            Some(mut pending) => {
                let current = pending.in_flight.stack.reference() == reply.stack.reference()
                    && pending.in_flight.stack.retry_count() == reply.stack.retry_count();
                if pending.advancing || !current {
                    tracing::debug!(
                        request_id = %reply.request_id,
                        reference = %reply.stack.reference(),
                        "Discarding stale reply"
                    );
                    None
                } else {
                    pending.advancing = true;
                    Some((pending.context.clone(), pending.in_flight.clone()))
                }
            }
        };
        let Some((context, in_flight)) = claimed else {
            return;
        };

        let snapshot = self.inner.registry.snapshot();
        match self
            .inner
            .orchestrator
            .on_reply(&context, &in_flight, &reply, &snapshot)
        {
            Ok(advance) => self.drive(context, advance, None).await,
            Err(e) => {
                tracing::error!(request_id = %context.request_id, error = %e, "Abandoning request");
                self.finish(&context, Err(e), None).await;
            }
        }
    }

    /// Fail every hop whose worker has not answered in time.
    pub async fn sweep(&self) {
        let now = Instant::now();
        let overdue: Vec<TransformReply> = self
            .inner
            .pending
            .iter()
            .filter(|pending| !pending.advancing && pending.deadline <= now)
            .map(|pending| {
                TransformReply::for_request(&pending.in_flight).with_failure(
                    status::INTERNAL_SERVER_ERROR,
                    format!(
                        "No reply within {}ms",
                        self.inner.dispatch_timeout.as_millis()
                    ),
                )
            })
            .collect();
        for reply in overdue {
            tracing::warn!(request_id = %reply.request_id, "Hop timed out");
            self.handle_reply(reply).await;
        }
    }

    /// Consume the reply queue and sweep for overdue hops until shutdown.
    pub fn spawn(
        &self,
        sweep_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> RouterResult<JoinHandle<()>> {
        let mut replies: mpsc::UnboundedReceiver<QueueMessage> =
            self.inner.queue.subscribe(&self.inner.reply_queue)?;
        let router = self.clone();
        Ok(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            tracing::info!(queue = %router.inner.reply_queue, "Queue router started");
            loop {
                tokio::select! {
                    message = replies.recv() => match message {
                        Some(QueueMessage::Reply(reply)) => {
                            let router = router.clone();
                            tokio::spawn(async move { router.handle_reply(reply).await });
                        }
                        Some(QueueMessage::Request(request)) => {
                            tracing::warn!(request_id = %request.request_id, "Ignoring request on the reply queue");
                        }
                        None => break,
                    },
                    _ = ticker.tick() => router.sweep().await,
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("Queue router stopped");
        }))
    }

    // ── Internal ─────────────────────────────────────────────────────

    async fn drive(
        &self,
        context: RequestContext,
        advance: Advance,
        mut completion: Option<oneshot::Sender<RouterResult<TransformReply>>>,
    ) {
        let Advance {
            decision,
            releasable,
        } = advance;
        for reference in releasable {
            self.inner.store.release(&reference).await;
        }

        let hop = match decision {
            Decision::Done(reply) => {
                self.finish(&context, Ok(reply), completion).await;
                return;
            }
            Decision::Dispatch(hop) => hop,
            Decision::Retry { hop, delay } => {
                tokio::time::sleep(delay).await;
                hop
            }
        };

        let mut request = hop.request;
        request.reply_to = Some(self.inner.reply_queue.clone());
        let deadline = Instant::now() + self.inner.dispatch_timeout;

        match completion.take() {
            Some(tx) => {
                self.inner.pending.insert(
                    context.request_id.clone(),
                    Pending {
                        context: context.clone(),
                        in_flight: request.clone(),
                        deadline,
                        advancing: false,
                        completion: Some(tx),
                    },
                );
            }
            None => match self.inner.pending.get_mut(&context.request_id) {
                Some(mut pending) => {
                    pending.in_flight = request.clone();
                    pending.deadline = deadline;
                    pending.advancing = false;
                }
                None => {
                    tracing::debug!(request_id = %context.request_id, "Request cancelled while advancing");
                    return;
                }
            },
        }

        if let Err(e) = self
            .inner
            .queue
            .send(&hop.worker, QueueMessage::Request(request))
            .await
        {
            // Left pending; the sweep fails it once the deadline passes.
            tracing::warn!(request_id = %context.request_id, worker = %hop.worker, error = %e, "Enqueue failed");
        }
    }

    async fn finish(
        &self,
        context: &RequestContext,
        result: RouterResult<TransformReply>,
        completion: Option<oneshot::Sender<RouterResult<TransformReply>>>,
    ) {
        let completion = match completion {
            Some(tx) => Some(tx),
            None => match self.inner.pending.remove(&context.request_id) {
                Some((_, pending)) => pending.completion,
                None => {
                    tracing::debug!(request_id = %context.request_id, "Request cancelled before it finished");
                    return;
                }
            },
        };

        if let Ok(reply) = &result {
            tracing::info!(
                request_id = %reply.request_id,
                status = reply.status,
                target = reply.target_reference.as_deref().unwrap_or(""),
                "Transform finished"
            );
            if let Some(reply_to) = &context.reply_to {
                if let Err(e) = self
                    .inner
                    .queue
                    .send(reply_to, QueueMessage::Reply(reply.clone()))
                    .await
                {
                    tracing::warn!(request_id = %reply.request_id, error = %e, "Could not deliver terminal reply");
                }
            }
        }
        if let Some(tx) = completion {
            let _ = tx.send(result);
        }
    }
}
