use serde::Serialize;
use std::collections::BTreeSet;
use stratus_schema::{Attributes, ResourceKey};

/// Difference between the previously stored and the freshly read observed
/// state of one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriftReport {
    pub key: String,
    pub added: Vec<String>,
    pub changed: Vec<String>,
    pub removed: Vec<String>,
    pub has_drift: bool,
}

impl DriftReport {
    pub fn none(key: &ResourceKey) -> Self {
        diff_observed(key, &Attributes::new(), &Attributes::new())
    }
}

/// Compare attribute maps by name; values are compared structurally.
pub fn diff_observed(
    key: &ResourceKey,
    previous: &Attributes,
    current: &Attributes,
) -> DriftReport {
    let names: BTreeSet<&String> = previous.keys().chain(current.keys()).collect();

    let mut added = Vec::new();
    let mut changed = Vec::new();
    let mut removed = Vec::new();

    for name in names {
        match (previous.get(name), current.get(name)) {
            (None, Some(_)) => added.push(name.clone()),
            (Some(_), None) => removed.push(name.clone()),
            (Some(a), Some(b)) if a != b => changed.push(name.clone()),
            _ => {}
        }
    }

    let has_drift = !added.is_empty() || !changed.is_empty() || !removed.is_empty();

    DriftReport {
        key: key.to_string(),
        added,
        changed,
        removed,
        has_drift,
    }
}
