//! Morph daemon library
//!
//! The pieces `morphd` is assembled from:
//! - [`config`]: layered daemon configuration
//! - [`api`]: the REST surface under `/api/v1`
//! - [`server`]: registry polling, the router and graceful shutdown

#![deny(unsafe_code)]

pub mod api;
pub mod config;
pub mod error;
pub mod server;

pub use api::rest::state::AppState;
pub use config::DaemonConfig;
pub use error::{ApiError, DaemonError};
pub use server::Server;
