//! Core versions and optional-feature gating
//!
//! Workers declare the version of the shared core they were built with.
//! Some protocol features only exist from a given core version onward, so a
//! composed capability may only advertise a feature when every participant
//! supports it. A participant without a declared version speaks the baseline
//! protocol only.

use crate::descriptor::CapabilityDescriptor;
use crate::error::{RegistryError, RegistryResult};
use crate::options::{OptionSets, TransformOption};
use morph_types::options::{DIRECT_ACCESS_URL, SOURCE_FILENAME};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A worker's core version, e.g. `5.1.9`.
///
/// Parsing is lenient: anything from the first `-` is dropped and missing
/// minor or patch components count as zero.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CoreVersion(semver::Version);

impl CoreVersion {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self(semver::Version::new(major, minor, patch))
    }

    pub fn as_semver(&self) -> &semver::Version {
        &self.0
    }
}

impl FromStr for CoreVersion {
    type Err = RegistryError;

    fn from_str(raw: &str) -> RegistryResult<Self> {
        let trimmed = raw.trim();
        let release = match trimmed.find('-') {
            Some(i) if i > 0 => &trimmed[..i],
            _ => trimmed,
        };
        let mut parts = [0u64; 3];
        let mut count = 0;
        for (i, part) in release.split('.').enumerate() {
            if i >= parts.len() {
                return Err(RegistryError::InvalidVersion(raw.to_string()));
            }
            parts[i] = part
                .parse()
                .map_err(|_| RegistryError::InvalidVersion(raw.to_string()))?;
            count += 1;
        }
        if count == 0 {
            return Err(RegistryError::InvalidVersion(raw.to_string()));
        }
        Ok(Self::new(parts[0], parts[1], parts[2]))
    }
}

impl TryFrom<String> for CoreVersion {
    type Error = RegistryError;

    fn try_from(raw: String) -> RegistryResult<Self> {
        raw.parse()
    }
}

impl From<CoreVersion> for String {
    fn from(version: CoreVersion) -> Self {
        version.to_string()
    }
}

impl fmt::Display for CoreVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Features ─────────────────────────────────────────────────────────

/// Protocol features that depend on the core version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreFeature {
    /// Content passed as a fetchable URL.
    DirectAccessUrl,
    /// The original filename passed along with the content.
    SourceFilename,
    /// Synchronous HTTP transforms.
    Http,
    /// Queue based transforms.
    Queue,
}

impl CoreFeature {
    pub const GATED: [CoreFeature; 2] = [CoreFeature::DirectAccessUrl, CoreFeature::SourceFilename];

    fn range(&self) -> (Option<CoreVersion>, Option<CoreVersion>) {
        match self {
            CoreFeature::DirectAccessUrl => (Some(CoreVersion::new(2, 5, 7)), None),
            CoreFeature::SourceFilename => (Some(CoreVersion::new(5, 1, 9)), None),
            CoreFeature::Http => (None, Some(CoreVersion::new(99999, 0, 0))),
            CoreFeature::Queue => (Some(CoreVersion::new(1, 0, 0)), None),
        }
    }

    /// Name of the option set a descriptor gains when the feature is usable.
    pub fn option_set(&self) -> Option<&'static str> {
        match self {
            CoreFeature::DirectAccessUrl => Some(DIRECT_ACCESS_URL),
            CoreFeature::SourceFilename => Some(SOURCE_FILENAME),
            CoreFeature::Http | CoreFeature::Queue => None,
        }
    }

    /// `None` is the baseline, older than every declared version.
    pub fn is_supported(&self, version: Option<&CoreVersion>) -> bool {
        let (from, to) = self.range();
        let above_from = match (&from, version) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(from), Some(version)) => version >= from,
        };
        let below_to = match (&to, version) {
            (None, _) => true,
            (Some(_), None) => true,
            (Some(to), Some(version)) => version <= to,
        };
        above_from && below_to
    }
}

// ── Gate ─────────────────────────────────────────────────────────────

/// Applies feature availability to descriptors before they are published.
pub struct VersionGate;

impl VersionGate {
    /// The version a composition can rely on: the lowest participant
    /// version, or the baseline when any participant has none.
    pub fn combined_version<'a>(
        versions: impl IntoIterator<Item = Option<&'a CoreVersion>>,
    ) -> Option<CoreVersion> {
        let mut lowest: Option<&CoreVersion> = None;
        let mut seen = false;
        for version in versions {
            seen = true;
            let version = version?;
            lowest = match lowest {
                Some(current) if current <= version => Some(current),
                _ => Some(version),
            };
        }
        if seen {
            lowest.cloned()
        } else {
            None
        }
    }

    /// Add or remove each gated option set name according to the
    /// descriptor's core version.
    pub fn decorate(descriptor: &mut CapabilityDescriptor) {
        for feature in CoreFeature::GATED {
            let Some(set) = feature.option_set() else {
                continue;
            };
            if feature.is_supported(descriptor.core_version.as_ref()) {
                descriptor.option_sets.insert(set.to_string());
            } else {
                descriptor.option_sets.remove(set);
            }
        }
    }

    /// Define the gated option sets when any descriptor uses them, and drop
    /// them otherwise.
    pub fn sync_option_sets<'a>(
        sets: &mut OptionSets,
        descriptors: impl IntoIterator<Item = &'a CapabilityDescriptor> + Clone,
    ) {
        for feature in CoreFeature::GATED {
            let Some(set) = feature.option_set() else {
                continue;
            };
            let used = descriptors
                .clone()
                .into_iter()
                .any(|d| feature.is_supported(d.core_version.as_ref()));
            if used {
                sets.insert(set.to_string(), vec![TransformOption::value(set)]);
            } else {
                sets.remove(set);
            }
        }
    }

    /// Stamp a worker's own version on its single-step descriptors, as a
    /// worker does before advertising its config.
    pub fn stamp_leaves(
        descriptors: &mut [CapabilityDescriptor],
        sets: &mut OptionSets,
        version: Option<&CoreVersion>,
    ) {
        for descriptor in descriptors.iter_mut().filter(|d| !d.composition.is_composite()) {
            descriptor.core_version = version.cloned();
            Self::decorate(descriptor);
        }
        Self::sync_option_sets(sets, descriptors.iter());
    }
}
