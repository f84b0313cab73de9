//! Error types for the capability registry

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// Nothing in the snapshot can perform the requested conversion.
    #[error("No capable worker for {source_media_type} ({source_size} bytes) -> {target_media_type}")]
    NoCapableWorker {
        source_media_type: String,
        target_media_type: String,
        source_size: u64,
    },

    #[error("Transformer \"{name}\" is invalid: {reason}")]
    InvalidDescriptor { name: String, reason: String },

    #[error("Invalid core version \"{0}\"")]
    InvalidVersion(String),

    #[error("Unknown transformer: {0}")]
    UnknownTransformer(String),

    #[error("Failed to read config from {origin}: {message}")]
    Source { origin: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl RegistryError {
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        RegistryError::InvalidDescriptor {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;
