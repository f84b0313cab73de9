//! Transform request and reply envelopes
//!
//! The same envelope shape is used on every hop: client to router, router
//! to worker, and back. Only the embedded [`ExecutionStack`] tells a hop
//! where the request stands.

use crate::error::{EnvelopeError, EnvelopeResult, FailureKind, StackError};
use crate::stack::ExecutionStack;
use crate::{SCHEMA_VERSION, TOKEN_SEPARATOR};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Reply status codes used on the wire.
pub mod status {
    pub const CREATED: u16 = 201;
    pub const BAD_REQUEST: u16 = 400;
    pub const INTERNAL_SERVER_ERROR: u16 = 500;
}

// ── Request Identifier ───────────────────────────────────────────────

/// Correlates a request with its replies across hops.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

// ── Request ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformRequest {
    pub request_id: RequestId,
    pub source_reference: String,
    pub source_media_type: String,
    pub source_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_extension: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_filename: Option<String>,
    pub target_media_type: String,
    pub target_extension: String,
    pub client_data: String,
    #[serde(default)]
    pub transform_options: BTreeMap<String, String>,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// Where the terminal reply goes when the request arrived over a queue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub stack: ExecutionStack,
}

impl TransformRequest {
    /// Check identity fields in a fixed order and report the first problem.
    /// The stack is not inspected; see [`TransformRequest::validate_for_worker`].
    pub fn validate(&self) -> EnvelopeResult<()> {
        let required = [
            ("requestId", self.request_id.as_str()),
            ("sourceReference", self.source_reference.as_str()),
            ("sourceMediaType", self.source_media_type.as_str()),
            ("targetMediaType", self.target_media_type.as_str()),
            ("targetExtension", self.target_extension.as_str()),
            ("clientData", self.client_data.as_str()),
        ];
        if let Some((field, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(EnvelopeError::MissingField(*field));
        }
        // Carried into level tokens as a step input.
        if self.source_reference.contains(TOKEN_SEPARATOR) {
            return Err(EnvelopeError::ReservedCharacter("sourceReference"));
        }
        if self.schema_version > SCHEMA_VERSION {
            return Err(StackError::UnsupportedSchema {
                found: self.schema_version,
                supported: SCHEMA_VERSION,
            }
            .into());
        }
        Ok(())
    }

    /// A worker additionally needs a live level whose current step it can run.
    pub fn validate_for_worker(&self) -> EnvelopeResult<()> {
        self.validate()?;
        self.stack.check_structure()?;
        Ok(())
    }
}

// ── Reply ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformReply {
    pub request_id: RequestId,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_size: Option<u64>,
    pub client_data: String,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub stack: ExecutionStack,
}

impl TransformReply {
    /// A reply echoing the identity fields and stack of `request`, with no
    /// status decided yet.
    pub fn for_request(request: &TransformRequest) -> Self {
        Self {
            request_id: request.request_id.clone(),
            status: status::CREATED,
            error_details: None,
            source_reference: Some(request.source_reference.clone()),
            target_reference: None,
            target_size: None,
            client_data: request.client_data.clone(),
            schema_version: request.schema_version,
            stack: request.stack.clone(),
        }
    }

    pub fn with_target(mut self, reference: impl Into<String>, size: u64) -> Self {
        self.status = status::CREATED;
        self.target_reference = Some(reference.into());
        self.target_size = Some(size);
        self
    }

    pub fn with_failure(mut self, status: u16, details: impl Into<String>) -> Self {
        self.status = status;
        self.error_details = Some(details.into());
        self
    }

    pub fn is_success(&self) -> bool {
        FailureKind::from_status(self.status).is_none()
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        FailureKind::from_status(self.status)
    }
}
