//! Morph router
//!
//! Resolves a client's transform request against the registry, expands the
//! chosen capability into an execution stack and walks that stack hop by
//! hop, retrying transient failures and moving through failover
//! alternatives, until the plan succeeds or is exhausted.
//!
//! # Architecture
//!
//! - [`plan`]: levels from descriptors, worker requests from steps
//! - [`orchestrator`]: the reply-driven state machine shared by both modes
//! - [`router`]: synchronous mode, hops sent over HTTP one after another
//! - [`queue_router`]: queue mode, hops sent as messages and tracked in a
//!   pending set with deadlines
//! - [`transport`] / [`queue`]: the worker and message queue seams
//! - [`store`]: releasing consumed artifacts
//!
//! Each request resolves against a single registry snapshot for its first
//! hop; queue mode takes a fresh snapshot for every reply.

#![deny(unsafe_code)]

pub mod error;
pub mod orchestrator;
pub mod plan;
pub mod queue;
pub mod queue_router;
pub mod retry;
pub mod router;
pub mod store;
pub mod transport;

pub use error::{RouterError, RouterResult};
pub use orchestrator::{Advance, Decision, Hop, Orchestrator};
pub use plan::{RequestContext, MAX_DEPTH};
pub use queue::{InMemoryQueue, MessageQueue, QueueMessage};
pub use queue_router::{Completion, QueueRouter};
pub use retry::RetryPolicy;
pub use router::{Router, RouterConfig, HTTP_ENTRY_REFERENCE};
pub use store::{ArtifactStore, NoopArtifactStore, RecordingArtifactStore};
pub use transport::{HttpWorkerClient, WorkerClient, TRANSFORM_PATH};
