//! HTTP API for morphd

pub mod rest;

pub use rest::router::create_router;
