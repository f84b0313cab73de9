//! Morph core types
//!
//! Everything a router and a worker need to agree on to walk a multi-hop
//! transform plan without sharing memory:
//!
//! - [`Step`]: one worker converting between two media types
//! - [`Level`]: one pipeline or failover frame of the plan
//! - [`ExecutionStack`]: the nested frames plus the original request inputs,
//!   carried inside every message and walked with [`ExecutionStack::complete_step`]
//! - [`TransformRequest`] / [`TransformReply`]: the wire envelopes
//!
//! # Wire form
//!
//! The stack travels as a JSON array of tokens. The first two tokens hold the
//! original transform options and the original source reference; every token
//! after that is one [`Level`]. Decoding validates the whole structure and
//! fails with a [`StackError`] rather than trusting the sender.
//!
//! ```rust
//! use morph_types::{ExecutionStack, Level, Progress, Step, StepOutcome};
//!
//! let mut stack = ExecutionStack::new(Default::default(), Some("src-1".into())).unwrap();
//! stack.push_level(Level::pipeline(vec![
//!     Step::new("libreoffice", "text/plain", "application/pdf").unwrap(),
//!     Step::new("imagemagick", "application/pdf", "image/png").unwrap(),
//! ]).unwrap());
//!
//! assert_eq!(stack.complete_step(StepOutcome::Success).unwrap(), Progress::Next);
//! assert_eq!(stack.current_step().unwrap().worker_name(), "imagemagick");
//! assert_eq!(stack.complete_step(StepOutcome::Success).unwrap(), Progress::Succeeded);
//! ```

#![deny(unsafe_code)]

pub mod envelope;
pub mod error;
pub mod level;
pub mod stack;
pub mod step;

pub use envelope::{RequestId, TransformReply, TransformRequest};
pub use error::{EnvelopeError, EnvelopeResult, FailureKind, StackError, StackResult};
pub use level::{Level, LevelInput, LevelKind};
pub use stack::{ExecutionStack, Progress, StepOutcome};
pub use step::Step;

/// Separator between fields inside a stack token.
pub const TOKEN_SEPARATOR: char = '\u{23D0}';

/// Highest envelope schema version this build understands.
pub const SCHEMA_VERSION: u32 = 1;

/// Media type (or half of a pair) matching anything.
pub const ANY_MEDIA_TYPE: &str = "*";

/// Well-known transform option names.
pub mod options {
    /// Per-request timeout; never used when matching option sets.
    pub const TIMEOUT: &str = "timeout";
    /// Pass a fetchable URL instead of the content itself.
    pub const DIRECT_ACCESS_URL: &str = "directAccessUrl";
    /// Pass the original filename of the source.
    pub const SOURCE_FILENAME: &str = "sourceFilename";
}
