//! Combining config documents into one routing table
//!
//! Documents are applied in tier order: live workers first, then the
//! historic override files, then the current ones. Within a tier they are
//! applied in the order the sources returned them. Each document first
//! applies its modifiers to what is already known, then adds its option sets
//! and transformers. A later transformer with the same name replaces the
//! earlier one.
//!
//! Once everything is added the table is finished in a fixed order:
//!
//! 1. descriptors referencing unknown option sets are discarded
//! 2. composites are ordered after what they reference; any that reference
//!    unknown transformers are discarded
//! 3. default priorities and size limits are applied
//! 4. composites without declared pairs get derived ones
//! 5. composites take the lowest core version of their participants and
//!    every descriptor's gated option sets are adjusted to its version
//!
//! Invalid entries are logged and dropped; a bad document never fails the
//! whole rebuild.

use crate::config::{SupportedDefault, SupportedEntry, TransformConfig};
use crate::descriptor::{CapabilityDescriptor, Composition, SizeLimit, SupportedPair, DEFAULT_PRIORITY};
use crate::options::{resolved_options, OptionSets};
use crate::snapshot::{RegistryRole, RegistrySnapshot};
use crate::version::{CoreFeature, VersionGate};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

// ── Origins ──────────────────────────────────────────────────────────

/// Where a document came from, in increasing precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTier {
    Worker,
    Historic,
    Current,
}

impl fmt::Display for SourceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceTier::Worker => write!(f, "worker"),
            SourceTier::Historic => write!(f, "historic"),
            SourceTier::Current => write!(f, "current"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigOrigin {
    pub tier: SourceTier,
    /// File path or worker URL, for log messages.
    pub read_from: String,
    /// Base URL of the worker that executes the descriptor.
    pub endpoint: Option<String>,
}

impl ConfigOrigin {
    pub fn worker(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            tier: SourceTier::Worker,
            read_from: base_url.clone(),
            endpoint: Some(base_url),
        }
    }

    pub fn file(tier: SourceTier, path: impl Into<String>) -> Self {
        Self {
            tier,
            read_from: path.into(),
            endpoint: None,
        }
    }
}

/// A document together with its origin.
#[derive(Debug, Clone)]
pub struct SourcedConfig {
    pub origin: ConfigOrigin,
    pub config: TransformConfig,
}

impl SourcedConfig {
    pub fn new(origin: ConfigOrigin, config: TransformConfig) -> Self {
        Self { origin, config }
    }
}

/// A merged descriptor and the origin that last defined it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredCapability {
    pub descriptor: CapabilityDescriptor,
    pub origin: ConfigOrigin,
}

impl RegisteredCapability {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

// ── Defaults ─────────────────────────────────────────────────────────

type DefaultKey = (Option<String>, Option<String>);

/// Configured defaults for pairs that declare no priority or size limit.
#[derive(Debug, Default)]
pub struct Defaults {
    priorities: HashMap<DefaultKey, i32>,
    limits: HashMap<DefaultKey, SizeLimit>,
}

impl Defaults {
    pub fn add(&mut self, default: &SupportedDefault) {
        let key = (default.transformer_name.clone(), default.source_media_type.clone());
        if let Some(priority) = default.priority {
            self.priorities.insert(key.clone(), priority);
        }
        if let Some(limit) = default.max_source_size_bytes {
            self.limits.insert(key, limit);
        }
    }

    pub fn priority(&self, transformer: &str, source: &str) -> i32 {
        Self::lookup(&self.priorities, transformer, source).unwrap_or(DEFAULT_PRIORITY)
    }

    pub fn limit(&self, transformer: &str, source: &str) -> SizeLimit {
        Self::lookup(&self.limits, transformer, source).unwrap_or(SizeLimit::Unlimited)
    }

    /// Most specific first: transformer and source, transformer, source,
    /// then system wide.
    fn lookup<T: Copy>(map: &HashMap<DefaultKey, T>, transformer: &str, source: &str) -> Option<T> {
        let transformer = Some(transformer.to_string());
        let source = Some(source.to_string());
        [
            (transformer.clone(), source.clone()),
            (transformer, None),
            (None, source),
            (None, None),
        ]
        .iter()
        .find_map(|key| map.get(key).copied())
    }
}

// ── Combining ────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct CombinedConfig {
    option_sets: OptionSets,
    entries: Vec<RegisteredCapability>,
    defaults: Defaults,
    worker_descriptors: usize,
}

impl CombinedConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add every document in tier order and finish the table.
    pub fn combine(configs: impl IntoIterator<Item = SourcedConfig>) -> Self {
        let mut configs: Vec<SourcedConfig> = configs.into_iter().collect();
        configs.sort_by_key(|c| c.origin.tier);

        let mut combined = Self::new();
        for config in configs {
            combined.add(config);
        }
        combined.finish();
        combined
    }

    /// Merge and publish as a snapshot in one go.
    pub fn build(configs: impl IntoIterator<Item = SourcedConfig>, role: RegistryRole) -> RegistrySnapshot {
        Self::combine(configs).into_snapshot(role)
    }

    pub fn into_snapshot(self, role: RegistryRole) -> RegistrySnapshot {
        RegistrySnapshot::new(role, self.option_sets, self.entries, self.worker_descriptors)
    }

    pub fn entries(&self) -> &[RegisteredCapability] {
        &self.entries
    }

    pub fn option_sets(&self) -> &OptionSets {
        &self.option_sets
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.descriptor.name == name)
    }

    fn get(&self, name: &str) -> Option<&RegisteredCapability> {
        self.entries.iter().find(|e| e.descriptor.name == name)
    }

    /// Apply one document's modifiers, then add its definitions.
    pub fn add(&mut self, sourced: SourcedConfig) {
        let SourcedConfig { origin, config } = sourced;
        let read_from = origin.read_from.as_str();

        for name in &config.remove_transformers {
            match self.position(name) {
                Some(i) => {
                    self.entries.remove(i);
                    tracing::debug!(transformer = %name, read_from, "Removed transformer");
                }
                None => {
                    tracing::warn!(transformer = %name, read_from, "removeTransformers names an unknown transformer");
                }
            }
        }

        for default in &config.supported_defaults {
            self.defaults.add(default);
        }

        for entry in &config.remove_supported {
            let removed = self.with_pairs(entry, |pairs| {
                let before = pairs.len();
                pairs.retain(|p| !p.is_pair(&entry.source_media_type, &entry.target_media_type));
                pairs.len() != before
            });
            if !removed {
                Self::warn_unmatched("removeSupported", entry, read_from);
            }
        }

        for entry in &config.add_supported {
            let added = self.with_pairs(entry, |pairs| {
                if pairs.iter().any(|p| p.is_pair(&entry.source_media_type, &entry.target_media_type)) {
                    return false;
                }
                pairs.push(entry.to_pair());
                true
            });
            if !added {
                Self::warn_unmatched("addSupported", entry, read_from);
            }
        }

        for entry in &config.override_supported {
            let replaced = self.with_pairs(entry, |pairs| {
                match pairs
                    .iter_mut()
                    .find(|p| p.is_pair(&entry.source_media_type, &entry.target_media_type))
                {
                    Some(pair) => {
                        pair.max_source_size_bytes = entry.max_source_size_bytes;
                        pair.priority = entry.priority;
                        true
                    }
                    None => false,
                }
            });
            if !replaced {
                Self::warn_unmatched("overrideSupported", entry, read_from);
            }
        }

        self.option_sets.extend(config.transform_options);

        for transformer in config.transformers {
            match CapabilityDescriptor::try_from(transformer) {
                Ok(descriptor) => {
                    if origin.tier == SourceTier::Worker {
                        self.worker_descriptors += 1;
                    }
                    self.register(descriptor, origin.clone());
                }
                Err(e) => {
                    tracing::warn!(read_from, error = %e, "Discarding transformer");
                }
            }
        }
    }

    fn with_pairs(&mut self, entry: &SupportedEntry, apply: impl FnOnce(&mut Vec<SupportedPair>) -> bool) -> bool {
        match self.position(&entry.transformer_name) {
            Some(i) => apply(&mut self.entries[i].descriptor.supported),
            None => false,
        }
    }

    fn warn_unmatched(modifier: &str, entry: &SupportedEntry, read_from: &str) {
        tracing::warn!(
            modifier,
            transformer = %entry.transformer_name,
            source = %entry.source_media_type,
            target = %entry.target_media_type,
            read_from,
            "Modifier did not match any supported pair"
        );
    }

    fn register(&mut self, mut descriptor: CapabilityDescriptor, mut origin: ConfigOrigin) {
        let from_file = origin.tier != SourceTier::Worker;
        let is_leaf = !descriptor.composition.is_composite();
        let name = descriptor.name.clone();
        if !is_leaf {
            // Composites are expanded by the router, never dispatched.
            origin.endpoint = None;
        }

        let Some(i) = self.position(&name) else {
            if from_file && is_leaf {
                tracing::warn!(
                    transformer = %name,
                    read_from = %origin.read_from,
                    "Discarding single step transformer; no worker defines it"
                );
                return;
            }
            self.entries.push(RegisteredCapability { descriptor, origin });
            return;
        };

        let existing = &self.entries[i];
        if from_file && is_leaf {
            if existing.descriptor.composition.is_composite() {
                tracing::warn!(
                    transformer = %name,
                    read_from = %origin.read_from,
                    "Discarding single step transformer; it would replace a pipeline or failover"
                );
                return;
            }
            // The replacement still runs on the worker that defined the original.
            origin.endpoint = existing.origin.endpoint.clone();
            if descriptor.core_version.is_none() {
                descriptor.core_version = existing.descriptor.core_version.clone();
            }
        }

        if existing.descriptor == descriptor {
            tracing::debug!(transformer = %name, read_from = %origin.read_from, "Transformer defined again");
        } else {
            tracing::warn!(
                transformer = %name,
                read_from = %origin.read_from,
                replaced = %existing.origin.read_from,
                "Transformer overrides an earlier definition"
            );
        }
        self.entries[i] = RegisteredCapability { descriptor, origin };
    }

    // ── Finishing ────────────────────────────────────────────────────

    fn finish(&mut self) {
        self.remove_invalid();
        self.sort();
        self.apply_defaults();
        self.derive_supported();
        self.gate_versions();
    }

    fn remove_invalid(&mut self) {
        let option_sets = &self.option_sets;
        self.entries.retain(|entry| {
            let unknown: Vec<&String> = entry
                .descriptor
                .option_sets
                .iter()
                .filter(|name| !option_sets.contains_key(*name) && !is_gated(name))
                .collect();
            if !unknown.is_empty() {
                tracing::warn!(
                    transformer = %entry.descriptor.name,
                    read_from = %entry.origin.read_from,
                    unknown = ?unknown,
                    "Discarding transformer; it references unknown transform options"
                );
            }
            unknown.is_empty()
        });
    }

    /// Order composites after their participants, dropping any whose
    /// participants never appear.
    fn sort(&mut self) {
        let mut pending = std::mem::take(&mut self.entries);
        let mut placed: HashSet<String> = HashSet::new();
        let mut ordered = Vec::with_capacity(pending.len());

        loop {
            let (ready, waiting): (Vec<_>, Vec<_>) = pending.into_iter().partition(|e| {
                e.descriptor
                    .composition
                    .participants()
                    .iter()
                    .all(|p| placed.contains(*p))
            });
            pending = waiting;
            if ready.is_empty() {
                break;
            }
            for entry in ready {
                placed.insert(entry.descriptor.name.clone());
                ordered.push(entry);
            }
        }

        for entry in pending {
            let missing: Vec<&str> = entry
                .descriptor
                .composition
                .participants()
                .into_iter()
                .filter(|p| !placed.contains(*p))
                .collect();
            tracing::warn!(
                transformer = %entry.descriptor.name,
                read_from = %entry.origin.read_from,
                missing = ?missing,
                "Discarding transformer; its step transformers do not exist"
            );
        }
        self.entries = ordered;
    }

    fn apply_defaults(&mut self) {
        let defaults = &self.defaults;
        for entry in &mut self.entries {
            let name = entry.descriptor.name.as_str();
            for pair in &mut entry.descriptor.supported {
                if pair.priority.is_none() {
                    pair.priority = Some(defaults.priority(name, &pair.source_media_type));
                }
                if pair.max_source_size_bytes.is_none() {
                    pair.max_source_size_bytes = Some(defaults.limit(name, &pair.source_media_type));
                }
            }
        }
    }

    fn derive_supported(&mut self) {
        for i in 0..self.entries.len() {
            let entry = &self.entries[i];
            if !entry.descriptor.supported.is_empty() {
                continue;
            }
            let derived = match &entry.descriptor.composition {
                Composition::Leaf => continue,
                Composition::Failover(names) => self.derive_failover(names),
                Composition::Pipeline(_) => self.derive_pipeline(&entry.descriptor),
            };
            match derived {
                Ok(pairs) => self.entries[i].descriptor.supported = pairs,
                Err(reason) => {
                    tracing::error!(
                        transformer = %entry.descriptor.name,
                        read_from = %entry.origin.read_from,
                        reason = %reason,
                        "No supported source and target media types could be derived"
                    );
                }
            }
        }
    }

    /// Every pair of every alternative, one point more preferred than the
    /// alternative itself so the failover wins a tie.
    fn derive_failover(&self, names: &[String]) -> Result<Vec<SupportedPair>, String> {
        let mut pairs: Vec<SupportedPair> = Vec::new();
        for participant in names.iter().filter_map(|n| self.get(n)) {
            for pair in &participant.descriptor.supported {
                if pairs.iter().any(|p| p == pair) {
                    continue;
                }
                pairs.push(pair.clone());
            }
        }
        if pairs.is_empty() {
            return Err("the step transformers do not support any".to_string());
        }
        for pair in &mut pairs {
            pair.priority = Some(pair.effective_priority() - 1);
        }
        Ok(pairs)
    }

    /// Sources and limits come from the first step's pairs that produce the
    /// first intermediate type; targets from the final step's pairs that
    /// read the last intermediate type.
    fn derive_pipeline(&self, descriptor: &CapabilityDescriptor) -> Result<Vec<SupportedPair>, String> {
        let Composition::Pipeline(steps) = &descriptor.composition else {
            return Ok(Vec::new());
        };
        let step_descriptor = |name: &str| {
            self.get(name)
                .map(|e| &e.descriptor)
                .ok_or_else(|| format!("step transformer \"{}\" is missing", name))
        };

        let Some((first, rest)) = steps.split_first() else {
            return Err("the pipeline has no steps".to_string());
        };
        let Some(mut intermediate) = first.target_media_type.clone() else {
            return Err("the first step has no intermediate target".to_string());
        };
        let first_descriptor = step_descriptor(&first.transformer_name)?;
        let first_pairs: Vec<&SupportedPair> = first_descriptor
            .supported
            .iter()
            .filter(|p| p.target_media_type == intermediate)
            .collect();
        if first_pairs.is_empty() {
            return Err(format!(
                "the first step transformer \"{}\" does not support to \"{}\"",
                first.transformer_name, intermediate
            ));
        }

        let Some((last, middle)) = rest.split_last() else {
            return Err(format!(
                "the first step transformer \"{}\" already supports every pair",
                first.transformer_name
            ));
        };
        for step in middle {
            let Some(target) = step.target_media_type.as_deref() else {
                return Err("intermediate steps should have a target media type".to_string());
            };
            if step_descriptor(&step.transformer_name)?.pair(&intermediate, target).is_none() {
                return Err(format!(
                    "the step transformer \"{}\" does not support \"{}\" to \"{}\"",
                    step.transformer_name, intermediate, target
                ));
            }
            intermediate = target.to_string();
        }

        let final_targets: Vec<&str> = step_descriptor(&last.transformer_name)?
            .supported
            .iter()
            .filter(|p| p.source_media_type == intermediate)
            .map(|p| p.target_media_type.as_str())
            .collect();
        if final_targets.is_empty() {
            return Err(format!(
                "the final step transformer \"{}\" does not support from \"{}\"",
                last.transformer_name, intermediate
            ));
        }

        let mut pairs: Vec<SupportedPair> = Vec::new();
        for source in &first_pairs {
            for target in &final_targets {
                let pair = SupportedPair {
                    source_media_type: source.source_media_type.clone(),
                    target_media_type: target.to_string(),
                    max_source_size_bytes: source.max_source_size_bytes,
                    priority: source.priority,
                };
                if !pairs.contains(&pair) {
                    pairs.push(pair);
                }
            }
        }

        // No point in a pipeline for what its first step already does alone.
        if self.same_options(descriptor, first_descriptor) {
            pairs.retain(|p| !first_descriptor.supported.contains(p));
        }
        if pairs.is_empty() {
            return Err(format!(
                "the first transformer \"{}\" already supports every pair",
                first.transformer_name
            ));
        }
        Ok(pairs)
    }

    fn same_options(&self, a: &CapabilityDescriptor, b: &CapabilityDescriptor) -> bool {
        a.option_sets == b.option_sets
            || resolved_options(&a.option_sets, &self.option_sets)
                == resolved_options(&b.option_sets, &self.option_sets)
    }

    fn gate_versions(&mut self) {
        for i in 0..self.entries.len() {
            let descriptor = &self.entries[i].descriptor;
            if !descriptor.composition.is_composite() {
                continue;
            }
            let version = VersionGate::combined_version(
                descriptor
                    .composition
                    .participants()
                    .into_iter()
                    .map(|p| self.get(p).and_then(|e| e.descriptor.core_version.as_ref())),
            );
            self.entries[i].descriptor.core_version = version;
        }

        for entry in &mut self.entries {
            VersionGate::decorate(&mut entry.descriptor);
        }
        VersionGate::sync_option_sets(&mut self.option_sets, self.entries.iter().map(|e| &e.descriptor));
    }
}

fn is_gated(name: &str) -> bool {
    CoreFeature::GATED
        .iter()
        .any(|f| f.option_set() == Some(name))
}
