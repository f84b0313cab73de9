//! Named option sets and request option matching
//!
//! A descriptor references option sets by name. A set is a list of option
//! values and nested groups. A request's options match a descriptor when
//! every option that has become required is supplied and no supplied option
//! is unknown to the descriptor. A group only contributes its options once
//! one of its members is supplied, unless the group itself is required and
//! so are all of its enclosing groups.

use morph_types::options::TIMEOUT;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Option set definitions keyed by set name.
pub type OptionSets = BTreeMap<String, Vec<TransformOption>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformOption {
    Value(OptionValue),
    Group(OptionGroup),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OptionValue {
    pub name: String,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionGroup {
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub transform_options: Vec<TransformOption>,
}

impl TransformOption {
    pub fn value(name: impl Into<String>) -> Self {
        TransformOption::Value(OptionValue {
            name: name.into(),
            required: false,
        })
    }

    pub fn required(name: impl Into<String>) -> Self {
        TransformOption::Value(OptionValue {
            name: name.into(),
            required: true,
        })
    }

    pub fn group(required: bool, options: Vec<TransformOption>) -> Self {
        TransformOption::Group(OptionGroup {
            required,
            transform_options: options,
        })
    }
}

/// Flatten the option sets named by a descriptor.
///
/// Unknown names are skipped; the merge step has already discarded
/// descriptors that reference them.
pub fn lookup<'a>(names: &BTreeSet<String>, sets: &'a OptionSets) -> Vec<&'a [TransformOption]> {
    names
        .iter()
        .filter_map(|name| sets.get(name).map(Vec::as_slice))
        .collect()
}

/// Do the supplied options fit the given option sets?
///
/// `timeout` is never used to pick a transformer and is ignored.
pub fn options_match(sets: &[&[TransformOption]], actual: &BTreeMap<String, String>) -> bool {
    let actual: BTreeMap<&str, &str> = actual
        .iter()
        .filter(|(name, _)| name.as_str() != TIMEOUT)
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();

    let mut possible = HashMap::new();
    for set in sets {
        gather(&mut possible, set, false, true, &actual);
    }

    let required_supplied = possible
        .iter()
        .filter(|(_, required)| **required)
        .all(|(name, _)| actual.contains_key(name.as_str()));

    required_supplied && actual.keys().all(|name| possible.contains_key(*name))
}

/// Add the options of one group that the request makes relevant. Returns
/// true when any option was added.
fn gather(
    possible: &mut HashMap<String, bool>,
    options: &[TransformOption],
    group_required: bool,
    parent_required: bool,
    actual: &BTreeMap<&str, &str>,
) -> bool {
    if options.is_empty() {
        return false;
    }
    let required_here = group_required && parent_required;

    let mut added = false;
    let mut in_use = false;
    for option in options {
        match option {
            TransformOption::Group(group) => {
                added = gather(
                    possible,
                    &group.transform_options,
                    group.required,
                    required_here,
                    actual,
                );
                in_use |= added;
            }
            TransformOption::Value(value) => {
                if actual.contains_key(value.name.as_str()) {
                    in_use = true;
                }
            }
        }
    }

    if in_use || required_here {
        for option in options {
            if let TransformOption::Value(value) = option {
                added = true;
                possible.insert(value.name.clone(), value.required);
            }
        }
    }
    added
}

/// The distinct options reachable from the named sets, used to compare two
/// descriptors' option surfaces.
pub fn resolved_options(names: &BTreeSet<String>, sets: &OptionSets) -> BTreeSet<TransformOption> {
    names
        .iter()
        .filter_map(|name| sets.get(name))
        .flatten()
        .cloned()
        .collect()
}
