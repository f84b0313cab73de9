//! Router error types

use morph_registry::RegistryError;
use morph_types::envelope::status;
use morph_types::{EnvelopeError, FailureKind, RequestId, StackError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    /// The request envelope is incomplete.
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// Nothing can perform the request; no stack was built.
    #[error(transparent)]
    Resolution(#[from] RegistryError),

    /// A stack failed validation or a transition was impossible.
    #[error("Protocol failure: {0}")]
    Protocol(#[from] StackError),

    #[error("Plan for {0} nests deeper than {1} levels")]
    PlanTooDeep(String, usize),

    #[error("Transformer \"{0}\" is not registered")]
    UnknownTransformer(String),

    /// The worker could not be reached or did not answer in time.
    #[error("Dispatch to {worker} failed: {message}")]
    Dispatch { worker: String, message: String },

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Request {0} was cancelled")]
    Cancelled(RequestId),

    #[error("Request {0} is already in flight")]
    Duplicate(RequestId),
}

impl RouterError {
    pub fn dispatch(worker: impl Into<String>, message: impl ToString) -> Self {
        RouterError::Dispatch {
            worker: worker.into(),
            message: message.to_string(),
        }
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            RouterError::Envelope(_)
            | RouterError::Protocol(_)
            | RouterError::PlanTooDeep(..)
            | RouterError::Duplicate(_) => FailureKind::Protocol,
            RouterError::Resolution(_) | RouterError::UnknownTransformer(_) => {
                FailureKind::Resolution
            }
            RouterError::Dispatch { .. } | RouterError::Queue(_) | RouterError::Cancelled(_) => {
                FailureKind::Transient
            }
        }
    }

    /// Reply status used when this error ends a request.
    pub fn status(&self) -> u16 {
        match self.failure_kind() {
            FailureKind::Transient => status::INTERNAL_SERVER_ERROR,
            _ => status::BAD_REQUEST,
        }
    }
}

pub type RouterResult<T> = Result<T, RouterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kinds() {
        let missing = RouterError::from(EnvelopeError::MissingField("clientData"));
        assert_eq!(missing.failure_kind(), FailureKind::Protocol);
        assert_eq!(missing.to_string(), "clientData cannot be null or empty");
        assert_eq!(missing.status(), 400);

        let none = RouterError::from(RegistryError::NoCapableWorker {
            source_media_type: "a/a".into(),
            target_media_type: "b/b".into(),
            source_size: 3,
        });
        assert_eq!(none.failure_kind(), FailureKind::Resolution);

        let down = RouterError::dispatch("tika", "connection refused");
        assert_eq!(down.failure_kind(), FailureKind::Transient);
        assert_eq!(down.status(), 500);
    }
}
