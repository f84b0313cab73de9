//! Capability config documents
//!
//! The JSON shape advertised by a worker at `GET /transform/config` and read
//! from override files. Entries are kept raw here; validation happens when
//! they are turned into [`CapabilityDescriptor`](crate::CapabilityDescriptor)s
//! during merge.

use crate::descriptor::{PipelineStep, SizeLimit, SupportedPair};
use crate::error::RegistryResult;
use crate::options::OptionSets;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformConfig {
    #[serde(default, skip_serializing_if = "OptionSets::is_empty")]
    pub transform_options: OptionSets,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub remove_transformers: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_defaults: Vec<SupportedDefault>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove_supported: Vec<SupportedEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add_supported: Vec<SupportedEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub override_supported: Vec<SupportedEntry>,
    #[serde(default)]
    pub transformers: Vec<TransformerConfig>,
}

impl TransformConfig {
    pub fn from_json(json: &str) -> RegistryResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub async fn load(path: impl AsRef<Path>) -> RegistryResult<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        Self::from_json(&raw)
    }

    /// True when the document only carries option sets and no transformers
    /// or modifiers.
    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
            && self.remove_transformers.is_empty()
            && self.supported_defaults.is_empty()
            && self.remove_supported.is_empty()
            && self.add_supported.is_empty()
            && self.override_supported.is_empty()
    }
}

/// One transformer entry as written in a document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformerConfig {
    #[serde(default)]
    pub transformer_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core_version: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub transform_options: BTreeSet<String>,
    #[serde(default)]
    pub supported_source_and_target_list: Vec<SupportedPair>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transformer_pipeline: Vec<PipelineStep>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transformer_failover: Vec<String>,
}

/// Default priority and size for pairs that declare none.
///
/// With both names set the default applies to that transformer and source
/// type; with one set it applies to every pair of that transformer or source
/// type; with neither it is system wide.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedDefault {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_source_size_bytes: Option<SizeLimit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

/// A pair addressed by transformer name, used by the supported-list modifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedEntry {
    pub transformer_name: String,
    pub source_media_type: String,
    pub target_media_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_source_size_bytes: Option<SizeLimit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

impl SupportedEntry {
    pub fn to_pair(&self) -> SupportedPair {
        SupportedPair {
            source_media_type: self.source_media_type.clone(),
            target_media_type: self.target_media_type.clone(),
            max_source_size_bytes: self.max_source_size_bytes,
            priority: self.priority,
        }
    }
}
