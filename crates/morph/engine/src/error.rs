//! Worker-side error types

use morph_types::envelope::status;
use morph_types::EnvelopeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// The current step names a transformer this worker does not run.
    #[error("Transformer \"{0}\" is not available on this worker")]
    UnknownTransformer(String),

    #[error("{transformer} does not support {source_media_type} to {target_media_type}")]
    Unsupported {
        transformer: String,
        source_media_type: String,
        target_media_type: String,
    },

    #[error("source of {size} bytes exceeds the {limit} byte limit")]
    SourceTooLarge { size: u64, limit: u64 },

    /// The request's step does not describe the envelope it arrived in.
    #[error("step {step} does not match the request's media types")]
    StepMismatch { step: String },

    /// An engine advertised a config that cannot be hosted.
    #[error("Invalid transformer config: {0}")]
    InvalidConfig(String),

    #[error("Queue error: {0}")]
    Queue(String),

    /// The content cannot be converted; retrying will not help.
    #[error("{0}")]
    Content(String),

    /// Timeouts, unavailable dependencies and resource exhaustion.
    #[error("{0}")]
    Transient(String),
}

impl EngineError {
    /// Reply status this error is reported with.
    pub fn status(&self) -> u16 {
        match self {
            EngineError::Transient(_) | EngineError::Queue(_) => status::INTERNAL_SERVER_ERROR,
            _ => status::BAD_REQUEST,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status() {
        assert_eq!(EngineError::Content("corrupt".into()).status(), 400);
        assert_eq!(EngineError::Transient("busy".into()).status(), 500);
        assert_eq!(
            EngineError::from(EnvelopeError::MissingField("requestId")).to_string(),
            "requestId cannot be null or empty"
        );
    }
}
