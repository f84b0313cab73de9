//! Message queue seam for queue-mode routing
//!
//! Requests are sent to a destination named after the worker; replies go
//! to whatever destination the request's `replyTo` names.

use crate::error::{RouterError, RouterResult};
use async_trait::async_trait;
use dashmap::DashMap;
use morph_types::{TransformReply, TransformRequest};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum QueueMessage {
    Request(TransformRequest),
    Reply(TransformReply),
}

impl QueueMessage {
    pub fn to_json(&self) -> RouterResult<String> {
        serde_json::to_string(self).map_err(|e| RouterError::Queue(e.to_string()))
    }

    pub fn from_json(text: &str) -> RouterResult<Self> {
        serde_json::from_str(text).map_err(|e| RouterError::Queue(e.to_string()))
    }
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn send(&self, destination: &str, message: QueueMessage) -> RouterResult<()>;

    /// Take the single consumer of `destination`.
    fn subscribe(&self, destination: &str) -> RouterResult<mpsc::UnboundedReceiver<QueueMessage>>;
}

struct Destination {
    tx: mpsc::UnboundedSender<QueueMessage>,
    rx: Option<mpsc::UnboundedReceiver<QueueMessage>>,
}

impl Destination {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: Some(rx) }
    }
}

/// In-process queue. Messages sent before anyone subscribes are buffered.
/// Every message travels as JSON so the wire form is exercised.
#[derive(Default)]
pub struct InMemoryQueue {
    destinations: DashMap<String, Destination>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn send(&self, destination: &str, message: QueueMessage) -> RouterResult<()> {
        let message = QueueMessage::from_json(&message.to_json()?)?;
        let entry = self
            .destinations
            .entry(destination.to_string())
            .or_insert_with(Destination::new);
        entry
            .tx
            .send(message)
            .map_err(|_| RouterError::Queue(format!("{} has been closed", destination)))?;
        tracing::trace!(destination, "Message enqueued");
        Ok(())
    }

    fn subscribe(&self, destination: &str) -> RouterResult<mpsc::UnboundedReceiver<QueueMessage>> {
        let mut entry = self
            .destinations
            .entry(destination.to_string())
            .or_insert_with(Destination::new);
        entry
            .rx
            .take()
            .ok_or_else(|| RouterError::Queue(format!("{} already has a consumer", destination)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply() -> TransformReply {
        serde_json::from_value(serde_json::json!({
            "requestId": "r-1",
            "status": 201,
            "clientData": "cd"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_buffered_until_subscribed() {
        let queue = InMemoryQueue::new();
        queue.send("replies", QueueMessage::Reply(reply())).await.unwrap();

        let mut rx = queue.subscribe("replies").unwrap();
        assert_eq!(rx.recv().await, Some(QueueMessage::Reply(reply())));
    }

    #[tokio::test]
    async fn test_single_consumer() {
        let queue = InMemoryQueue::new();
        let _rx = queue.subscribe("w").unwrap();
        assert!(matches!(queue.subscribe("w"), Err(RouterError::Queue(_))));
    }

    #[test]
    fn test_message_json_shape() {
        let json = QueueMessage::Reply(reply()).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "reply");
        assert_eq!(value["body"]["requestId"], "r-1");
    }
}
