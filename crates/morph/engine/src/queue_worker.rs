//! Consuming transform requests from a message queue

use crate::error::{EngineError, EngineResult};
use crate::handler::RequestHandler;
use morph_router::{MessageQueue, QueueMessage};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Serves every hosted transformer from the queue named after it.
pub struct QueueWorker {
    handler: Arc<RequestHandler>,
    queue: Arc<dyn MessageQueue>,
}

impl QueueWorker {
    pub fn new(handler: Arc<RequestHandler>, queue: Arc<dyn MessageQueue>) -> Self {
        Self { handler, queue }
    }

    /// One consumer task per transformer. Each request is handled on its
    /// own task and the reply sent to the request's `replyTo`.
    pub fn spawn(&self, shutdown: watch::Receiver<bool>) -> EngineResult<Vec<JoinHandle<()>>> {
        let mut tasks = Vec::new();
        for name in self.handler.transformer_names() {
            let mut requests = self
                .queue
                .subscribe(name)
                .map_err(|e| EngineError::Queue(e.to_string()))?;
            let handler = self.handler.clone();
            let queue = self.queue.clone();
            let mut shutdown = shutdown.clone();
            let name = name.to_string();

            tasks.push(tokio::spawn(async move {
                tracing::info!(queue = %name, "Queue consumer started");
                loop {
                    tokio::select! {
                        message = requests.recv() => match message {
                            Some(QueueMessage::Request(request)) => {
                                let handler = handler.clone();
                                let queue = queue.clone();
                                tokio::spawn(async move {
                                    let reply_to = request.reply_to.clone();
                                    let reply = handler.handle(request).await;
                                    match reply_to {
                                        Some(destination) => {
                                            if let Err(e) = queue.send(&destination, QueueMessage::Reply(reply)).await {
                                                tracing::warn!(destination = %destination, error = %e, "Could not send reply");
                                            }
                                        }
                                        None => {
                                            tracing::warn!(request_id = %reply.request_id, "Request has no replyTo; reply dropped");
                                        }
                                    }
                                });
                            }
                            Some(QueueMessage::Reply(reply)) => {
                                tracing::warn!(request_id = %reply.request_id, "Ignoring reply on a request queue");
                            }
                            None => break,
                        },
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
                tracing::info!(queue = %name, "Queue consumer stopped");
            }));
        }
        Ok(tasks)
    }
}
