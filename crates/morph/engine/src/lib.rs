//! Morph worker engine
//!
//! The worker half of the protocol: accept an envelope, check it, run the
//! step on top of its stack with a hosted [`TransformEngine`], and reply
//! with the stack unchanged.
//!
//! # Architecture
//!
//! - [`engine`]: the converter seam and its job/output types
//! - [`handler`]: validation, step execution, reply construction and the
//!   advertised capability config
//! - [`http`]: `POST /transform`, `GET /transform/config`, `GET /live`
//! - [`queue_worker`]: the same handler fed from a message queue

#![deny(unsafe_code)]

pub mod engine;
pub mod error;
pub mod handler;
pub mod http;
pub mod queue_worker;

pub use engine::{TransformEngine, TransformJob, TransformOutput};
pub use error::{EngineError, EngineResult};
pub use handler::RequestHandler;
pub use http::worker_routes;
pub use queue_worker::QueueWorker;
