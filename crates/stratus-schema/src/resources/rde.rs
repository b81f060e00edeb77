use super::{require_name, Resource};
use crate::descriptor::{
    AttributeDescriptor as A, LockLevel, ParentRef, ResourceDescriptor, ResourceKind, UpdateGroup,
};
use crate::diff::{AttributeDiff, DiffBuilder};
use crate::value::{AttrValue, Attributes};
use crate::SchemaError;
use serde::{Deserialize, Serialize};

pub static RDE_TYPE: ResourceDescriptor = ResourceDescriptor {
    kind: ResourceKind::RdeType,
    attributes: &[
        A::immutable("vendor"),
        A::immutable("namespace"),
        A::immutable("version"),
        A::mutable("name", UpdateGroup::Core),
        A::mutable("description", UpdateGroup::Core),
        A::mutable("schema", UpdateGroup::Core),
        A::immutable("interface_ids"),
        A::computed("href"),
        A::computed("created_at"),
    ],
    child_sets: &[],
    parent_attr: None,
    lock: LockLevel::None,
    unique_name: false,
};

/// Runtime-defined entity type, identified by vendor, namespace and version.
/// Several types may share a display name, hence the positional import form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RdeType {
    pub vendor: String,
    pub namespace: String,
    pub version: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema document, kept as text.
    pub schema: String,
    #[serde(default)]
    pub interface_ids: Vec<String>,
}

impl RdeType {
    /// Canonical form of the schema so that formatting changes do not count as
    /// drift.
    fn canonical_schema(&self) -> String {
        serde_json::from_str::<serde_json::Value>(&self.schema)
            .map_or_else(|_| self.schema.clone(), |v| v.to_string())
    }
}

fn is_semver(version: &str) -> bool {
    let parts: Vec<&str> = version.split('.').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
}

impl Resource for RdeType {
    fn kind(&self) -> ResourceKind {
        ResourceKind::RdeType
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self) -> Result<(), SchemaError> {
        let kind = self.kind();
        require_name(kind, &self.name)?;
        for (field, value) in [("vendor", &self.vendor), ("namespace", &self.namespace)] {
            if value.is_empty() {
                return Err(SchemaError::invalid(
                    kind,
                    &self.name,
                    format!("{field} must not be empty"),
                ));
            }
        }
        if !is_semver(&self.version) {
            return Err(SchemaError::invalid(
                kind,
                &self.name,
                format!("version '{}' is not MAJOR.MINOR.PATCH", self.version),
            ));
        }
        let parsed: serde_json::Value = serde_json::from_str(&self.schema).map_err(|e| {
            SchemaError::invalid(kind, &self.name, format!("schema is not valid JSON: {e}"))
        })?;
        if !parsed.is_object() {
            return Err(SchemaError::invalid(
                kind,
                &self.name,
                "schema must be a JSON object",
            ));
        }
        Ok(())
    }

    fn parent(&self) -> Option<ParentRef> {
        None
    }

    fn to_attributes(&self) -> Attributes {
        let mut a = Attributes::new();
        a.insert("vendor".to_owned(), AttrValue::from(&self.vendor));
        a.insert("namespace".to_owned(), AttrValue::from(&self.namespace));
        a.insert("version".to_owned(), AttrValue::from(&self.version));
        a.insert("name".to_owned(), AttrValue::from(&self.name));
        a.insert("description".to_owned(), AttrValue::from(&self.description));
        a.insert("schema".to_owned(), AttrValue::from(self.canonical_schema()));
        a.insert(
            "interface_ids".to_owned(),
            AttrValue::string_set(&self.interface_ids),
        );
        a
    }

    fn diff(&self, observed: &Attributes) -> AttributeDiff {
        DiffBuilder::new(observed)
            .field("vendor", &self.vendor)
            .field("namespace", &self.namespace)
            .field("version", &self.version)
            .field("name", &self.name)
            .field("description", &self.description)
            .field("schema", self.canonical_schema())
            .set("interface_ids", &self.interface_ids)
            .finish()
    }
}
