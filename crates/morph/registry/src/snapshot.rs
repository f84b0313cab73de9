//! Immutable routing table
//!
//! A [`RegistrySnapshot`] is built once per rebuild and never changes. All
//! resolution queries read from one snapshot so a request never sees half of
//! a rebuild.

use crate::config::{TransformConfig, TransformerConfig};
use crate::descriptor::{CapabilityDescriptor, SizeLimit};
use crate::error::{RegistryError, RegistryResult};
use crate::merge::RegisteredCapability;
use crate::options::{lookup, options_match, OptionSets};
use crate::version::CoreFeature;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Config version from which core versions are published.
pub const CORE_VERSION_CONFIG: u32 = 2;

/// What the registry is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryRole {
    /// Builds plans, so pipelines and failovers are visible.
    #[default]
    Router,
    /// Forwards one hop at a time. Pipelines and failovers are flattened:
    /// their names are not visible, only the single-step transformers they use.
    Dispatcher,
}

#[derive(Debug, Clone)]
struct Candidate {
    name: String,
    limit: SizeLimit,
    priority: i32,
}

#[derive(Debug)]
pub struct RegistrySnapshot {
    role: RegistryRole,
    option_sets: OptionSets,
    capabilities: Vec<RegisteredCapability>,
    by_name: HashMap<String, usize>,
    exact: HashMap<(String, String), Vec<Candidate>>,
    wildcard: Vec<(String, String, Candidate)>,
    worker_descriptors: usize,
    built_at: DateTime<Utc>,
}

impl Default for RegistrySnapshot {
    fn default() -> Self {
        Self::new(RegistryRole::default(), OptionSets::new(), Vec::new(), 0)
    }
}

impl RegistrySnapshot {
    /// Index merged descriptors. A dispatcher drops the composites.
    pub fn new(
        role: RegistryRole,
        option_sets: OptionSets,
        capabilities: Vec<RegisteredCapability>,
        worker_descriptors: usize,
    ) -> Self {
        let capabilities: Vec<RegisteredCapability> = capabilities
            .into_iter()
            .filter(|c| role == RegistryRole::Router || !c.descriptor.composition.is_composite())
            .collect();

        let mut by_name = HashMap::new();
        let mut exact: HashMap<(String, String), Vec<Candidate>> = HashMap::new();
        let mut wildcard = Vec::new();

        for (i, capability) in capabilities.iter().enumerate() {
            let descriptor = &capability.descriptor;
            by_name.insert(descriptor.name.clone(), i);
            for pair in &descriptor.supported {
                let candidate = Candidate {
                    name: descriptor.name.clone(),
                    limit: pair.effective_limit(),
                    priority: pair.effective_priority(),
                };
                let key = (pair.source_media_type.clone(), pair.target_media_type.clone());
                if pair.is_wildcard() {
                    wildcard.push((key.0, key.1, candidate));
                } else {
                    exact.entry(key).or_default().push(candidate);
                }
            }
        }

        for candidates in exact.values_mut() {
            sort_candidates(candidates);
        }
        wildcard.sort_by(|a, b| {
            a.2.priority
                .cmp(&b.2.priority)
                .then_with(|| a.2.name.cmp(&b.2.name))
        });

        Self {
            role,
            option_sets,
            capabilities,
            by_name,
            exact,
            wildcard,
            worker_descriptors,
            built_at: Utc::now(),
        }
    }

    pub fn role(&self) -> RegistryRole {
        self.role
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Descriptors contributed by live workers before merging.
    pub fn worker_descriptor_count(&self) -> usize {
        self.worker_descriptors
    }

    pub fn option_sets(&self) -> &OptionSets {
        &self.option_sets
    }

    pub fn capabilities(&self) -> impl Iterator<Item = &RegisteredCapability> {
        self.capabilities.iter()
    }

    pub fn capability(&self, name: &str) -> Option<&RegisteredCapability> {
        self.by_name.get(name).map(|i| &self.capabilities[*i])
    }

    pub fn descriptor(&self, name: &str) -> Option<&CapabilityDescriptor> {
        self.capability(name).map(|c| &c.descriptor)
    }

    /// Base URL of the worker that runs `name`; composites have none.
    pub fn endpoint(&self, name: &str) -> Option<&str> {
        self.capability(name).and_then(|c| c.origin.endpoint.as_deref())
    }

    fn options_fit(&self, name: &str, options: &BTreeMap<String, String>) -> bool {
        match self.descriptor(name) {
            Some(descriptor) => {
                options_match(&lookup(&descriptor.option_sets, &self.option_sets), options)
            }
            None => false,
        }
    }

    /// Candidates able to take the request, best first. Exact pairs are
    /// considered before wildcards; wildcards only if no exact pair fits.
    fn candidates(
        &self,
        source: &str,
        size: u64,
        target: &str,
        options: &BTreeMap<String, String>,
    ) -> Vec<&Candidate> {
        let fits = |c: &&Candidate| c.limit.allows(size) && self.options_fit(&c.name, options);

        let exact: Vec<&Candidate> = self
            .exact
            .get(&(source.to_string(), target.to_string()))
            .map(|cs| cs.iter().filter(fits).collect())
            .unwrap_or_default();
        if !exact.is_empty() {
            return exact;
        }

        self.wildcard
            .iter()
            .filter(|(s, t, _)| {
                (s == source || s == morph_types::ANY_MEDIA_TYPE)
                    && (t == target || t == morph_types::ANY_MEDIA_TYPE)
            })
            .map(|(_, _, c)| c)
            .filter(fits)
            .collect()
    }

    /// Pick the descriptor for a request: lowest priority, then name.
    pub fn resolve(
        &self,
        source: &str,
        size: u64,
        target: &str,
        options: &BTreeMap<String, String>,
    ) -> RegistryResult<&CapabilityDescriptor> {
        self.find_transformer_name(source, size, target, options)
            .and_then(|name| self.descriptor(name))
            .ok_or_else(|| RegistryError::NoCapableWorker {
                source_media_type: source.to_string(),
                target_media_type: target.to_string(),
                source_size: size,
            })
    }

    pub fn find_transformer_name(
        &self,
        source: &str,
        size: u64,
        target: &str,
        options: &BTreeMap<String, String>,
    ) -> Option<&str> {
        self.candidates(source, size, target, options)
            .into_iter()
            .next()
            .map(|c| c.name.as_str())
    }

    /// Largest source any candidate accepts, or `None` when nothing
    /// supports the pair with these options.
    pub fn find_max_size(
        &self,
        source: &str,
        target: &str,
        options: &BTreeMap<String, String>,
    ) -> Option<SizeLimit> {
        self.candidates(source, 0, target, options)
            .into_iter()
            .map(|c| c.limit)
            .max()
    }

    pub fn is_supported(
        &self,
        source: &str,
        size: u64,
        target: &str,
        options: &BTreeMap<String, String>,
    ) -> bool {
        !self.candidates(source, size, target, options).is_empty()
    }

    /// Whether the named descriptor accepts a source of `size` for the pair.
    /// False when the descriptor or pair is unknown.
    pub fn check_source_size(&self, name: &str, source: &str, size: u64, target: &str) -> bool {
        self.descriptor(name)
            .and_then(|d| d.matching_pair(source, target))
            .is_some_and(|pair| pair.allows(size))
    }

    pub fn is_feature_supported(&self, name: &str, feature: CoreFeature) -> bool {
        self.descriptor(name)
            .is_some_and(|d| feature.is_supported(d.core_version.as_ref()))
    }

    /// The merged config as published to clients. Core versions are only
    /// included from [`CORE_VERSION_CONFIG`] onward.
    pub fn config(&self, config_version: u32) -> TransformConfig {
        let transformers = self
            .capabilities
            .iter()
            .map(|c| {
                let mut transformer = TransformerConfig::from(&c.descriptor);
                if config_version < CORE_VERSION_CONFIG {
                    transformer.core_version = None;
                }
                transformer
            })
            .collect();
        TransformConfig {
            transform_options: self.option_sets.clone(),
            transformers,
            ..Default::default()
        }
    }
}

fn sort_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
}
