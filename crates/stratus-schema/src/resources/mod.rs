//! Typed resource kinds.
//!
//! Every kind is a plain struct with statically typed fields and its own
//! explicit diff function against the observed attribute map. [`ResourceSpec`]
//! is the tagged union the rest of the engine stores and passes around.

pub mod access;
pub mod catalog;
pub mod network;
pub mod org;
pub mod rde;
pub mod vapp;
pub mod vdc;

pub use access::{AccessControl, AclEntry};
pub use catalog::Catalog;
pub use network::{EdgeGateway, Firewall, FirewallRuleSpec, NatRule, RoutedNetwork};
pub use org::Org;
pub use rde::RdeType;
pub use vapp::{VApp, Vm};
pub use vdc::{StorageProfile, Vdc, VdcGroup};

use crate::child::ChildRecord;
use crate::descriptor::{ParentRef, ResourceKind};
use crate::diff::AttributeDiff;
use crate::types::ResourceKey;
use crate::value::{AttrValue, Attributes};
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Behaviour shared by every resource kind.
pub trait Resource {
    fn kind(&self) -> ResourceKind;

    /// Display name; not necessarily unique.
    fn name(&self) -> &str;

    fn validate(&self) -> Result<(), SchemaError>;

    fn parent(&self) -> Option<ParentRef>;

    /// Full desired attribute map, child collections included, as sent on create.
    fn to_attributes(&self) -> Attributes;

    /// Scalar attribute differences; child collections are synchronized
    /// separately.
    fn diff(&self, observed: &Attributes) -> AttributeDiff;

    fn child_sets(&self) -> Vec<ChildSet> {
        Vec::new()
    }
}

/// Desired contents of one child collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildSet {
    pub name: &'static str,
    pub records: Vec<ChildRecord>,
}

/// Key/value metadata attached to an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetadataEntry {
    pub key: String,
    pub value: String,
    #[serde(default = "default_metadata_type")]
    pub value_type: String,
    #[serde(default)]
    pub is_system: bool,
}

fn default_metadata_type() -> String {
    "MetadataStringValue".to_owned()
}

pub(crate) fn default_true() -> bool {
    true
}

/// Canonical wire form of a metadata list: one map per entry, sorted by key.
pub(crate) fn metadata_value(entries: &[MetadataEntry]) -> Vec<AttrValue> {
    let mut sorted: Vec<&MetadataEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| a.key.cmp(&b.key));
    sorted
        .into_iter()
        .map(|e| {
            let mut m = Attributes::new();
            m.insert("key".to_owned(), AttrValue::from(&e.key));
            m.insert("value".to_owned(), AttrValue::from(&e.value));
            m.insert("type".to_owned(), AttrValue::from(&e.value_type));
            m.insert("is_system".to_owned(), AttrValue::Bool(e.is_system));
            AttrValue::Map(m)
        })
        .collect()
}

/// Flat `key -> value` pairs of a `metadata_entry` list; malformed entries are
/// skipped.
pub fn metadata_pairs(attrs: &Attributes) -> BTreeMap<String, String> {
    let Some(entries) = attrs.get("metadata_entry").and_then(AttrValue::as_list) else {
        return BTreeMap::new();
    };
    entries
        .iter()
        .filter_map(AttrValue::as_map)
        .filter_map(|m| {
            let key = m.get("key")?.as_str()?;
            let value = m.get("value")?.as_str()?;
            Some((key.to_owned(), value.to_owned()))
        })
        .collect()
}

pub(crate) fn validate_metadata(
    kind: ResourceKind,
    name: &str,
    entries: &[MetadataEntry],
) -> Result<(), SchemaError> {
    let mut seen = BTreeSet::new();
    for e in entries {
        if e.key.is_empty() {
            return Err(SchemaError::invalid(kind, name, "metadata key must not be empty"));
        }
        if !seen.insert(e.key.as_str()) {
            return Err(SchemaError::invalid(
                kind,
                name,
                format!("duplicate metadata key '{}'", e.key),
            ));
        }
    }
    Ok(())
}

pub(crate) fn require_name(kind: ResourceKind, name: &str) -> Result<(), SchemaError> {
    if name.trim().is_empty() {
        return Err(SchemaError::invalid(kind, name, "name must not be empty"));
    }
    Ok(())
}

pub(crate) fn require_non_negative(
    kind: ResourceKind,
    name: &str,
    field: &str,
    value: Option<i64>,
) -> Result<(), SchemaError> {
    match value {
        Some(v) if v < 0 => Err(SchemaError::invalid(
            kind,
            name,
            format!("{field} must be >= 0, got {v}"),
        )),
        _ => Ok(()),
    }
}

pub(crate) fn require_one_of(
    kind: ResourceKind,
    name: &str,
    field: &str,
    value: &str,
    allowed: &[&str],
) -> Result<(), SchemaError> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(SchemaError::invalid(
            kind,
            name,
            format!("{field} '{value}' is not one of {}", allowed.join(", ")),
        ))
    }
}

pub(crate) fn require_unique_keys<'a>(
    kind: ResourceKind,
    name: &str,
    set: &str,
    keys: impl Iterator<Item = &'a str>,
) -> Result<(), SchemaError> {
    let mut seen = BTreeSet::new();
    for key in keys {
        if !seen.insert(key) {
            return Err(SchemaError::invalid(
                kind,
                name,
                format!("duplicate key '{key}' in {set}"),
            ));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceSpec {
    Org(Org),
    Vdc(Vdc),
    VdcGroup(VdcGroup),
    Catalog(Catalog),
    #[serde(rename = "vapp")]
    VApp(VApp),
    Vm(Vm),
    EdgeGateway(EdgeGateway),
    RoutedNetwork(RoutedNetwork),
    NatRule(NatRule),
    Firewall(Firewall),
    AccessControl(AccessControl),
    RdeType(RdeType),
}

macro_rules! dispatch {
    ($self:expr, $r:ident => $body:expr) => {
        match $self {
            ResourceSpec::Org($r) => $body,
            ResourceSpec::Vdc($r) => $body,
            ResourceSpec::VdcGroup($r) => $body,
            ResourceSpec::Catalog($r) => $body,
            ResourceSpec::VApp($r) => $body,
            ResourceSpec::Vm($r) => $body,
            ResourceSpec::EdgeGateway($r) => $body,
            ResourceSpec::RoutedNetwork($r) => $body,
            ResourceSpec::NatRule($r) => $body,
            ResourceSpec::Firewall($r) => $body,
            ResourceSpec::AccessControl($r) => $body,
            ResourceSpec::RdeType($r) => $body,
        }
    };
}

impl Resource for ResourceSpec {
    fn kind(&self) -> ResourceKind {
        dispatch!(self, r => r.kind())
    }

    fn name(&self) -> &str {
        dispatch!(self, r => r.name())
    }

    fn validate(&self) -> Result<(), SchemaError> {
        dispatch!(self, r => r.validate())
    }

    fn parent(&self) -> Option<ParentRef> {
        dispatch!(self, r => r.parent())
    }

    fn to_attributes(&self) -> Attributes {
        dispatch!(self, r => r.to_attributes())
    }

    fn diff(&self, observed: &Attributes) -> AttributeDiff {
        dispatch!(self, r => r.diff(observed))
    }

    fn child_sets(&self) -> Vec<ChildSet> {
        dispatch!(self, r => r.child_sets())
    }
}

/// One entry of a desired-state file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DesiredResource {
    pub key: ResourceKey,
    pub spec: ResourceSpec,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DesiredFile {
    #[serde(default)]
    resource: Vec<DesiredResource>,
}

pub fn parse_desired_str(content: &str) -> Result<Vec<DesiredResource>, SchemaError> {
    let file: DesiredFile = toml::from_str(content)?;
    let mut seen = BTreeSet::new();
    for r in &file.resource {
        if !seen.insert(r.key.as_str()) {
            return Err(SchemaError::DuplicateKey(r.key.to_string()));
        }
        r.spec.validate()?;
    }
    Ok(file.resource)
}

pub fn parse_desired_file(path: &Path) -> Result<Vec<DesiredResource>, SchemaError> {
    let content = std::fs::read_to_string(path)?;
    parse_desired_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[[resource]]
key = "org-main"
[resource.spec]
kind = "org"
name = "main"
full_name = "Main Org"

[[resource]]
key = "vdc-main"
[resource.spec]
kind = "vdc"
name = "main-vdc"
org_id = "urn:vcloud:org:1"
allocation_model = "Flex"
memory_limit_mb = 0

[[resource.spec.storage_profiles]]
name = "gold"
default = true

[[resource.spec.storage_profiles]]
name = "silver"
limit_mb = 10240
"#;

    #[test]
    fn parses_tagged_resources() {
        let resources = parse_desired_str(SAMPLE).unwrap();
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0].spec.kind(), ResourceKind::Org);
        let ResourceSpec::Vdc(vdc) = &resources[1].spec else {
            panic!("expected vdc");
        };
        assert_eq!(vdc.memory_limit_mb, Some(0));
        assert_eq!(vdc.cpu_limit_mhz, None);
        assert_eq!(vdc.storage_profiles.len(), 2);
        assert!(vdc.storage_profiles[1].enabled);
    }

    #[test]
    fn duplicate_keys_rejected() {
        let doubled = format!(
            "{}\n[[resource]]\nkey = \"org-main\"\n[resource.spec]\nkind = \"org\"\nname = \"x\"\nfull_name = \"x\"\n",
            SAMPLE
        );
        let err = parse_desired_str(&doubled).unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateKey(k) if k == "org-main"));
    }

    #[test]
    fn unknown_field_rejected() {
        let bad = r#"
[[resource]]
key = "o"
[resource.spec]
kind = "org"
name = "o"
full_name = "o"
colour = "blue"
"#;
        assert!(parse_desired_str(bad).is_err());
    }

    #[test]
    fn metadata_value_sorted_by_key() {
        let entries = vec![
            MetadataEntry {
                key: "b".to_owned(),
                value: "2".to_owned(),
                value_type: default_metadata_type(),
                is_system: false,
            },
            MetadataEntry {
                key: "a".to_owned(),
                value: "1".to_owned(),
                value_type: default_metadata_type(),
                is_system: false,
            },
        ];
        let v = metadata_value(&entries);
        assert_eq!(v[0].as_map().unwrap()["key"], AttrValue::from("a"));
    }

    #[test]
    fn metadata_pairs_flatten_entries() {
        let entries = vec![MetadataEntry {
            key: "env".to_owned(),
            value: "prod".to_owned(),
            value_type: default_metadata_type(),
            is_system: false,
        }];
        let mut attrs = Attributes::new();
        attrs.insert("metadata_entry".to_owned(), AttrValue::List(metadata_value(&entries)));
        attrs.insert("name".to_owned(), AttrValue::from("x"));
        let pairs = metadata_pairs(&attrs);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs["env"], "prod");
        assert!(metadata_pairs(&Attributes::new()).is_empty());
    }

    #[test]
    fn spec_json_roundtrip() {
        let resources = parse_desired_str(SAMPLE).unwrap();
        let json = serde_json::to_string(&resources[1].spec).unwrap();
        assert!(json.contains("\"kind\":\"vdc\""));
        let back: ResourceSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, resources[1].spec);
    }
}
