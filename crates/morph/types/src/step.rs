//! A single unit of dispatched work

use crate::error::{StackError, StackResult};
use crate::TOKEN_SEPARATOR;
use std::fmt;

/// One worker converting content from one media type to another.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Step {
    worker_name: String,
    source_media_type: String,
    target_media_type: String,
}

impl Step {
    /// Create a step. All three fields must be non-blank and free of the
    /// token separator.
    pub fn new(
        worker_name: impl Into<String>,
        source_media_type: impl Into<String>,
        target_media_type: impl Into<String>,
    ) -> StackResult<Self> {
        let step = Self {
            worker_name: worker_name.into(),
            source_media_type: source_media_type.into(),
            target_media_type: target_media_type.into(),
        };
        check_field("workerName", &step.worker_name)?;
        check_field("sourceMediaType", &step.source_media_type)?;
        check_field("targetMediaType", &step.target_media_type)?;
        Ok(step)
    }

    pub fn worker_name(&self) -> &str {
        &self.worker_name
    }

    pub fn source_media_type(&self) -> &str {
        &self.source_media_type
    }

    pub fn target_media_type(&self) -> &str {
        &self.target_media_type
    }

    pub(crate) fn push_fields(&self, out: &mut Vec<String>) {
        out.push(self.worker_name.clone());
        out.push(self.source_media_type.clone());
        out.push(self.target_media_type.clone());
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} -> {})",
            self.worker_name, self.source_media_type, self.target_media_type
        )
    }
}

fn check_field(name: &str, value: &str) -> StackResult<()> {
    if value.trim().is_empty() {
        return Err(StackError::InvalidStep(format!("{} is blank", name)));
    }
    if value.contains(TOKEN_SEPARATOR) {
        return Err(StackError::InvalidStep(format!(
            "{} contains the token separator",
            name
        )));
    }
    Ok(())
}
