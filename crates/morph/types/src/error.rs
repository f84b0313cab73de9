//! Protocol error types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A stack or stack component failed structural validation.
///
/// Any of these on a received message means the position in the plan cannot
/// be trusted and the request is abandoned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StackError {
    #[error("stack must hold at least {expected} tokens, found {found}")]
    MissingReservedSlots { expected: usize, found: usize },

    #[error("stack options are invalid: {0}")]
    InvalidOptions(String),

    #[error("stack level {index} is invalid: {source}")]
    InvalidLevel {
        index: usize,
        #[source]
        source: Box<StackError>,
    },

    #[error("unrecognised level kind flag '{0}'")]
    UnknownKind(String),

    #[error("level has no steps")]
    EmptyLevel,

    #[error("level token is malformed: {0}")]
    MalformedLevel(String),

    #[error("invalid step: {0}")]
    InvalidStep(String),

    #[error("invalid level reference '{0}'")]
    InvalidReference(String),

    #[error("level input reference '{0}' contains the token separator")]
    InvalidInput(String),

    #[error("stack has no live level")]
    NoLiveLevel,

    #[error("unsupported schema version {found}, this build understands up to {supported}")]
    UnsupportedSchema { found: u32, supported: u32 },
}

pub type StackResult<T> = Result<T, StackError>;

/// A transform envelope failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("{0} cannot be null or empty")]
    MissingField(&'static str),

    #[error("{0} cannot contain the token separator")]
    ReservedCharacter(&'static str),

    #[error("invalid execution stack: {0}")]
    Stack(#[from] StackError),
}

pub type EnvelopeResult<T> = Result<T, EnvelopeError>;

/// Failure classes a router distinguishes when a step does not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The content cannot be converted by this worker. Never retried.
    Content,
    /// Timeout, unavailable worker or resource exhaustion. Retried up to a bound.
    Transient,
    /// No capable worker for the request.
    Resolution,
    /// The embedded stack failed validation.
    Protocol,
}

impl FailureKind {
    /// Classify an HTTP-style reply status. Success codes have no failure kind.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            200..=299 => None,
            400..=499 => Some(FailureKind::Content),
            _ => Some(FailureKind::Transient),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::Transient)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            FailureKind::Content => "content",
            FailureKind::Transient => "transient",
            FailureKind::Resolution => "resolution",
            FailureKind::Protocol => "protocol",
        };
        write!(f, "{}", label)
    }
}
