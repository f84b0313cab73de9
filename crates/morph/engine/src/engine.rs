//! The seam between the protocol and an actual converter

use crate::error::EngineResult;
use async_trait::async_trait;
use morph_registry::{OptionSets, TransformerConfig};
use morph_types::TransformRequest;
use std::collections::BTreeMap;

/// Everything a converter needs for one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformJob {
    pub source_reference: String,
    pub source_media_type: String,
    pub source_size: u64,
    pub source_extension: Option<String>,
    pub source_filename: Option<String>,
    pub target_media_type: String,
    pub target_extension: String,
    pub options: BTreeMap<String, String>,
}

impl TransformJob {
    pub fn from_request(request: &TransformRequest) -> Self {
        Self {
            source_reference: request.source_reference.clone(),
            source_media_type: request.source_media_type.clone(),
            source_size: request.source_size,
            source_extension: request.source_extension.clone(),
            source_filename: request.source_filename.clone(),
            target_media_type: request.target_media_type.clone(),
            target_extension: request.target_extension.clone(),
            options: request.transform_options.clone(),
        }
    }
}

/// Where the converter left the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOutput {
    pub target_reference: String,
    pub target_size: u64,
}

/// One single-step transformer hosted by a worker.
#[async_trait]
pub trait TransformEngine: Send + Sync {
    /// The transformer as advertised to routers. Its name is the name
    /// steps use to address this engine.
    fn config(&self) -> TransformerConfig;

    /// Option set definitions the config refers to.
    fn option_sets(&self) -> OptionSets {
        OptionSets::new()
    }

    async fn transform(&self, job: &TransformJob) -> EngineResult<TransformOutput>;
}
