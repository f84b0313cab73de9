//! Morph capability registry
//!
//! Merges the capability configs advertised by live workers with two tiers
//! of override files into one routing table, and answers which transformer
//! should run a request.
//!
//! # Architecture
//!
//! - [`config`]: the JSON config document model
//! - [`options`]: option set definitions and request option matching
//! - [`descriptor`]: validated descriptors (leaf, pipeline or failover)
//! - [`merge`]: tiered merge, ordering, defaults and derived pairs
//! - [`version`]: core versions and optional-feature gating
//! - [`snapshot`]: the immutable routing table and its queries
//! - [`registry`]: atomic publication of snapshots
//! - [`source`] / [`poller`]: where configs come from and the rebuild loop
//!
//! Readers call [`Registry::snapshot`] once per request and resolve against
//! that snapshot only.

#![deny(unsafe_code)]

pub mod config;
pub mod descriptor;
pub mod error;
pub mod merge;
pub mod options;
pub mod poller;
pub mod registry;
pub mod snapshot;
pub mod source;
pub mod version;

pub use config::{SupportedDefault, SupportedEntry, TransformConfig, TransformerConfig};
pub use descriptor::{
    CapabilityDescriptor, Composition, PipelineStep, SizeLimit, SupportedPair, DEFAULT_PRIORITY,
};
pub use error::{RegistryError, RegistryResult};
pub use merge::{CombinedConfig, ConfigOrigin, RegisteredCapability, SourceTier, SourcedConfig};
pub use options::{OptionSets, TransformOption};
pub use poller::RegistryPoller;
pub use registry::Registry;
pub use snapshot::{RegistryRole, RegistrySnapshot};
pub use source::{ConfigSource, FileConfigSource, InMemoryConfigSource, WorkerConfigSource};
pub use version::{CoreFeature, CoreVersion, VersionGate};
