//! Child-collection synchronization.
//!
//! Records are partitioned by natural key into kept, new and removed members.
//! Mutations are emitted in an order that never leaves a required collection
//! empty or without its default: confirm an existing default first, then add,
//! update in place, remove, and finally reorder if the collection is ordered.
//! There is no rollback; a failure part way is corrected by the next pass.

use crate::CoreError;
use std::collections::{BTreeMap, BTreeSet};
use stratus_schema::{ChildMutation, ChildRecord, ChildSetDescriptor};

fn invalid(set: &ChildSetDescriptor, reason: impl Into<String>) -> CoreError {
    CoreError::InvalidChildSet {
        set: set.name.to_owned(),
        reason: reason.into(),
    }
}

fn default_key<'a>(flag: &str, records: &'a [ChildRecord]) -> Vec<&'a str> {
    records
        .iter()
        .filter(|r| r.flag(flag))
        .map(|r| r.key.as_str())
        .collect()
}

/// Whether any field the operator manages differs remotely. Fields only the
/// remote side reports are ignored.
fn needs_update(flag: Option<&str>, existing: &ChildRecord, desired: &ChildRecord) -> bool {
    desired
        .without(flag)
        .iter()
        .any(|(k, v)| existing.attributes.get(k) != Some(v))
}

/// Compute the mutations that turn `existing` into `desired`.
///
/// A desired set with duplicate keys, or (for collections with an exclusivity
/// flag) with zero or several flagged members, is rejected before anything is
/// sent.
pub fn synchronize(
    set: &ChildSetDescriptor,
    existing: &[ChildRecord],
    desired: &[ChildRecord],
) -> Result<Vec<ChildMutation>, CoreError> {
    let mut seen = BTreeSet::new();
    for r in desired {
        if !seen.insert(r.key.as_str()) {
            return Err(invalid(set, format!("duplicate key '{}'", r.key)));
        }
    }

    let desired_default = match set.exclusive {
        Some(flag) => {
            let defaults = default_key(flag, desired);
            match defaults.as_slice() {
                [] if desired.is_empty() && existing.is_empty() => None,
                [] if desired.is_empty() => {
                    return Err(invalid(
                        set,
                        format!("removing every member leaves no '{flag}' member"),
                    ))
                }
                [] => return Err(invalid(set, format!("no member is marked '{flag}'"))),
                [one] => Some(*one),
                many => {
                    return Err(invalid(
                        set,
                        format!("several members are marked '{flag}': {}", many.join(", ")),
                    ))
                }
            }
        }
        None => None,
    };

    let existing_by_key: BTreeMap<&str, &ChildRecord> =
        existing.iter().map(|r| (r.key.as_str(), r)).collect();
    let desired_keys: BTreeSet<&str> = desired.iter().map(|r| r.key.as_str()).collect();

    let mut ops = Vec::new();

    // (a) Move the default to a member that already exists, so the old
    // default becomes removable.
    if let (Some(flag), Some(key)) = (set.exclusive, desired_default) {
        if let Some(current) = existing_by_key.get(key) {
            if !current.flag(flag) {
                ops.push(ChildMutation::SetDefault {
                    key: key.to_owned(),
                });
            }
        }
    }

    // (b) New members. A new default is added with its flag set, which moves
    // the default away from the old member.
    for r in desired {
        if !existing_by_key.contains_key(r.key.as_str()) {
            ops.push(ChildMutation::Add { record: r.clone() });
        }
    }

    // (c) Kept members whose managed fields differ.
    for r in desired {
        if let Some(current) = existing_by_key.get(r.key.as_str()) {
            if needs_update(set.exclusive, current, r) {
                ops.push(ChildMutation::Update {
                    record: ChildRecord::new(r.key.clone(), r.without(set.exclusive)),
                });
            }
        }
    }

    // (d) Removals last.
    for r in existing {
        if !desired_keys.contains(r.key.as_str()) {
            ops.push(ChildMutation::Remove { key: r.key.clone() });
        }
    }

    // (e) Additions append; restore the declared order if it differs.
    if set.ordered {
        let mut resulting: Vec<&str> = existing
            .iter()
            .map(|r| r.key.as_str())
            .filter(|k| desired_keys.contains(k))
            .collect();
        resulting.extend(
            desired
                .iter()
                .map(|r| r.key.as_str())
                .filter(|k| !existing_by_key.contains_key(k)),
        );
        let wanted: Vec<&str> = desired.iter().map(|r| r.key.as_str()).collect();
        if resulting != wanted {
            ops.push(ChildMutation::Reorder {
                keys: wanted.into_iter().map(str::to_owned).collect(),
            });
        }
    }

    Ok(ops)
}
