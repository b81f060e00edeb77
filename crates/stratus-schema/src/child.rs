use crate::descriptor::ChildSetDescriptor;
use crate::value::{AttrValue, Attributes};
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One member of a child collection, identified by its natural key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildRecord {
    pub key: String,
    pub attributes: Attributes,
}

impl ChildRecord {
    pub fn new(key: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            key: key.into(),
            attributes,
        }
    }

    pub fn flag(&self, name: &str) -> bool {
        self.attributes
            .get(name)
            .and_then(AttrValue::as_bool)
            .unwrap_or(false)
    }

    /// Attributes with the exclusivity flag removed, for comparing the fields an
    /// in-place update would touch.
    pub fn without(&self, flag: Option<&str>) -> Attributes {
        let mut attrs = self.attributes.clone();
        if let Some(flag) = flag {
            attrs.remove(flag);
        }
        attrs
    }

    pub fn to_value(&self) -> AttrValue {
        AttrValue::Map(self.attributes.clone())
    }

    /// Decode one record of an observed child list; the key attribute must be a
    /// string.
    pub fn from_value(set: &ChildSetDescriptor, value: &AttrValue) -> Result<Self, SchemaError> {
        let map = value.as_map().ok_or_else(|| SchemaError::ChildRecord {
            set: set.name.to_owned(),
            reason: "record is not a map".to_owned(),
        })?;
        let key = map
            .get(set.key)
            .and_then(AttrValue::as_str)
            .ok_or_else(|| SchemaError::ChildRecord {
                set: set.name.to_owned(),
                reason: format!("missing string key '{}'", set.key),
            })?;
        Ok(Self::new(key, map.clone()))
    }
}

/// Decode the observed list for `set`; an absent attribute is an empty set.
pub fn observed_children(
    set: &ChildSetDescriptor,
    observed: &Attributes,
) -> Result<Vec<ChildRecord>, SchemaError> {
    match observed.get(set.name) {
        None => Ok(Vec::new()),
        Some(AttrValue::List(items)) => items
            .iter()
            .map(|v| ChildRecord::from_value(set, v))
            .collect(),
        Some(_) => Err(SchemaError::ChildRecord {
            set: set.name.to_owned(),
            reason: "observed value is not a list".to_owned(),
        }),
    }
}

pub fn children_value(records: &[ChildRecord]) -> AttrValue {
    AttrValue::List(records.iter().map(ChildRecord::to_value).collect())
}

/// A single remote mutation of a child collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ChildMutation {
    SetDefault { key: String },
    Add { record: ChildRecord },
    Update { record: ChildRecord },
    Remove { key: String },
    Reorder { keys: Vec<String> },
}

impl ChildMutation {
    pub fn key(&self) -> Option<&str> {
        match self {
            ChildMutation::SetDefault { key } | ChildMutation::Remove { key } => Some(key),
            ChildMutation::Add { record } | ChildMutation::Update { record } => Some(&record.key),
            ChildMutation::Reorder { .. } => None,
        }
    }
}

impl fmt::Display for ChildMutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChildMutation::SetDefault { key } => write!(f, "set-default {key}"),
            ChildMutation::Add { record } => write!(f, "add {}", record.key),
            ChildMutation::Update { record } => write!(f, "update {}", record.key),
            ChildMutation::Remove { key } => write!(f, "remove {key}"),
            ChildMutation::Reorder { keys } => write!(f, "reorder [{}]", keys.join(", ")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILES: ChildSetDescriptor = ChildSetDescriptor {
        name: "storage_profiles",
        key: "name",
        exclusive: Some("default"),
        ordered: false,
    };

    fn record(name: &str, default: bool) -> AttrValue {
        let mut m = Attributes::new();
        m.insert("name".to_owned(), AttrValue::from(name));
        m.insert("default".to_owned(), AttrValue::Bool(default));
        AttrValue::Map(m)
    }

    #[test]
    fn decodes_observed_list() {
        let mut observed = Attributes::new();
        observed.insert(
            "storage_profiles".to_owned(),
            AttrValue::List(vec![record("gold", true), record("silver", false)]),
        );
        let children = observed_children(&PROFILES, &observed).unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].key, "gold");
        assert!(children[0].flag("default"));
        assert!(!children[1].flag("default"));
    }

    #[test]
    fn absent_set_is_empty() {
        let children = observed_children(&PROFILES, &Attributes::new()).unwrap();
        assert!(children.is_empty());
    }

    #[test]
    fn record_without_key_is_rejected() {
        let mut observed = Attributes::new();
        observed.insert(
            "storage_profiles".to_owned(),
            AttrValue::List(vec![AttrValue::Map(Attributes::new())]),
        );
        let err = observed_children(&PROFILES, &observed).unwrap_err();
        assert!(err.to_string().contains("missing string key"));
    }

    #[test]
    fn without_strips_flag() {
        let rec = ChildRecord::from_value(&PROFILES, &record("gold", true)).unwrap();
        let attrs = rec.without(Some("default"));
        assert!(!attrs.contains_key("default"));
        assert!(attrs.contains_key("name"));
    }

    #[test]
    fn mutation_display() {
        let m = ChildMutation::Remove {
            key: "gold".to_owned(),
        };
        assert_eq!(m.to_string(), "remove gold");
        assert_eq!(m.key(), Some("gold"));
    }
}
