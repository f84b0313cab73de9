//! Capability descriptors
//!
//! A [`CapabilityDescriptor`] is the validated form of one transformer entry
//! in a config document. It is either a single worker (a leaf) or a
//! composition of other descriptors, never both a pipeline and a failover.

use crate::config::TransformerConfig;
use crate::error::{RegistryError, RegistryResult};
use crate::version::CoreVersion;
use morph_types::ANY_MEDIA_TYPE;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

/// Priority given to a pair that declares none and has no configured default.
pub const DEFAULT_PRIORITY: i32 = 50;

// ── Size limit ───────────────────────────────────────────────────────

/// Largest source a pair accepts. `-1` on the wire means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum SizeLimit {
    Unlimited,
    Bytes(u64),
}

impl SizeLimit {
    pub fn allows(&self, size: u64) -> bool {
        match self {
            SizeLimit::Unlimited => true,
            SizeLimit::Bytes(max) => size <= *max,
        }
    }
}

impl From<i64> for SizeLimit {
    fn from(raw: i64) -> Self {
        if raw < 0 {
            SizeLimit::Unlimited
        } else {
            SizeLimit::Bytes(raw as u64)
        }
    }
}

impl From<SizeLimit> for i64 {
    fn from(limit: SizeLimit) -> Self {
        match limit {
            SizeLimit::Unlimited => -1,
            SizeLimit::Bytes(max) => i64::try_from(max).unwrap_or(i64::MAX),
        }
    }
}

impl Ord for SizeLimit {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SizeLimit::Unlimited, SizeLimit::Unlimited) => Ordering::Equal,
            (SizeLimit::Unlimited, _) => Ordering::Greater,
            (_, SizeLimit::Unlimited) => Ordering::Less,
            (SizeLimit::Bytes(a), SizeLimit::Bytes(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for SizeLimit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SizeLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeLimit::Unlimited => write!(f, "unlimited"),
            SizeLimit::Bytes(max) => write!(f, "{} bytes", max),
        }
    }
}

// ── Supported pairs ──────────────────────────────────────────────────

/// One source/target conversion a descriptor offers.
///
/// Limit and priority stay `None` until defaults are applied during merge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedPair {
    pub source_media_type: String,
    pub target_media_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_source_size_bytes: Option<SizeLimit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

impl SupportedPair {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source_media_type: source.into(),
            target_media_type: target.into(),
            max_source_size_bytes: None,
            priority: None,
        }
    }

    pub fn with_limit(mut self, limit: SizeLimit) -> Self {
        self.max_source_size_bytes = Some(limit);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn effective_priority(&self) -> i32 {
        self.priority.unwrap_or(DEFAULT_PRIORITY)
    }

    pub fn effective_limit(&self) -> SizeLimit {
        self.max_source_size_bytes.unwrap_or(SizeLimit::Unlimited)
    }

    pub fn allows(&self, size: u64) -> bool {
        self.effective_limit().allows(size)
    }

    pub fn is_pair(&self, source: &str, target: &str) -> bool {
        self.source_media_type == source && self.target_media_type == target
    }

    pub fn is_wildcard(&self) -> bool {
        self.source_media_type == ANY_MEDIA_TYPE || self.target_media_type == ANY_MEDIA_TYPE
    }

    /// Wildcard match: each side either equals the request or is `*`.
    pub fn covers(&self, source: &str, target: &str) -> bool {
        let side = |declared: &str, wanted: &str| declared == ANY_MEDIA_TYPE || declared == wanted;
        side(&self.source_media_type, source) && side(&self.target_media_type, target)
    }
}

// ── Composition ──────────────────────────────────────────────────────

/// One step of a pipeline composition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStep {
    pub transformer_name: String,
    /// Intermediate type produced by this step; `None` on the final step,
    /// which produces the request's target type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_media_type: Option<String>,
}

impl PipelineStep {
    pub fn new(transformer_name: impl Into<String>, target: Option<&str>) -> Self {
        Self {
            transformer_name: transformer_name.into(),
            target_media_type: target.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Composition {
    /// A single worker.
    #[default]
    Leaf,
    Pipeline(Vec<PipelineStep>),
    /// Alternatives tried in order.
    Failover(Vec<String>),
}

impl Composition {
    pub fn is_composite(&self) -> bool {
        !matches!(self, Composition::Leaf)
    }

    /// Names of the descriptors this composition runs, in declared order.
    pub fn participants(&self) -> Vec<&str> {
        match self {
            Composition::Leaf => Vec::new(),
            Composition::Pipeline(steps) => {
                steps.iter().map(|s| s.transformer_name.as_str()).collect()
            }
            Composition::Failover(names) => names.iter().map(String::as_str).collect(),
        }
    }
}

// ── Descriptor ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub supported: Vec<SupportedPair>,
    pub option_sets: BTreeSet<String>,
    pub composition: Composition,
    pub core_version: Option<CoreVersion>,
}

impl CapabilityDescriptor {
    pub fn leaf(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            supported: Vec::new(),
            option_sets: BTreeSet::new(),
            composition: Composition::Leaf,
            core_version: None,
        }
    }

    pub fn with_pair(mut self, pair: SupportedPair) -> Self {
        self.supported.push(pair);
        self
    }

    pub fn with_option_set(mut self, name: impl Into<String>) -> Self {
        self.option_sets.insert(name.into());
        self
    }

    pub fn pair(&self, source: &str, target: &str) -> Option<&SupportedPair> {
        self.supported.iter().find(|p| p.is_pair(source, target))
    }

    /// The pair that serves a request: exact first, then a wildcard.
    pub fn matching_pair(&self, source: &str, target: &str) -> Option<&SupportedPair> {
        self.pair(source, target).or_else(|| {
            self.supported
                .iter()
                .find(|p| p.is_wildcard() && p.covers(source, target))
        })
    }
}

impl TryFrom<TransformerConfig> for CapabilityDescriptor {
    type Error = RegistryError;

    fn try_from(config: TransformerConfig) -> RegistryResult<Self> {
        let name = config.transformer_name.trim().to_string();
        if name.is_empty() {
            return Err(RegistryError::invalid("", "transformer name is blank"));
        }

        let composition = match (
            config.transformer_pipeline.is_empty(),
            config.transformer_failover.is_empty(),
        ) {
            (true, true) => Composition::Leaf,
            (false, true) => {
                validate_pipeline(&name, &config.transformer_pipeline)?;
                Composition::Pipeline(config.transformer_pipeline)
            }
            (true, false) => {
                if config.transformer_failover.iter().any(|n| n.trim().is_empty()) {
                    return Err(RegistryError::invalid(&name, "failover has a blank transformer name"));
                }
                Composition::Failover(config.transformer_failover)
            }
            (false, false) => {
                return Err(RegistryError::invalid(
                    &name,
                    "cannot be both a pipeline and a failover",
                ));
            }
        };

        for pair in &config.supported_source_and_target_list {
            if pair.source_media_type.trim().is_empty() || pair.target_media_type.trim().is_empty() {
                return Err(RegistryError::invalid(&name, "supported pair has a blank media type"));
            }
        }

        let core_version = config
            .core_version
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .map(str::parse)
            .transpose()?;

        Ok(Self {
            name,
            supported: config.supported_source_and_target_list,
            option_sets: config.transform_options,
            composition,
            core_version,
        })
    }
}

fn validate_pipeline(name: &str, steps: &[PipelineStep]) -> RegistryResult<()> {
    let last = steps.len() - 1;
    for (i, step) in steps.iter().enumerate() {
        if step.transformer_name.trim().is_empty() {
            return Err(RegistryError::invalid(name, "pipeline has a blank transformer name"));
        }
        let has_target = step
            .target_media_type
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty());
        if i < last && !has_target {
            return Err(RegistryError::invalid(
                name,
                format!("pipeline step {} must declare an intermediate target", i + 1),
            ));
        }
        if i == last && has_target {
            return Err(RegistryError::invalid(
                name,
                "final pipeline step must not declare a target",
            ));
        }
    }
    Ok(())
}

impl From<&CapabilityDescriptor> for TransformerConfig {
    fn from(descriptor: &CapabilityDescriptor) -> Self {
        let (pipeline, failover) = match &descriptor.composition {
            Composition::Leaf => (Vec::new(), Vec::new()),
            Composition::Pipeline(steps) => (steps.clone(), Vec::new()),
            Composition::Failover(names) => (Vec::new(), names.clone()),
        };
        TransformerConfig {
            transformer_name: descriptor.name.clone(),
            core_version: descriptor.core_version.as_ref().map(ToString::to_string),
            transform_options: descriptor.option_sets.clone(),
            supported_source_and_target_list: descriptor.supported.clone(),
            transformer_pipeline: pipeline,
            transformer_failover: failover,
        }
    }
}
