use super::{
    default_true, metadata_value, require_name, require_non_negative, validate_metadata,
    MetadataEntry, Resource,
};
use crate::descriptor::{
    AttributeDescriptor as A, LockLevel, ParentRef, ResourceDescriptor, ResourceKind, UpdateGroup,
};
use crate::diff::{AttributeDiff, DiffBuilder};
use crate::value::{insert_opt, AttrValue, Attributes};
use crate::SchemaError;
use serde::{Deserialize, Serialize};

pub static ORG: ResourceDescriptor = ResourceDescriptor {
    kind: ResourceKind::Org,
    attributes: &[
        A::immutable("name"),
        A::mutable("full_name", UpdateGroup::Core),
        A::mutable("description", UpdateGroup::Core),
        A::mutable("enabled", UpdateGroup::Core),
        A::mutable("deployed_vm_quota", UpdateGroup::Core),
        A::mutable("stored_vm_quota", UpdateGroup::Core),
        A::mutable("metadata_entry", UpdateGroup::Metadata),
        A::computed("href"),
        A::computed("created_at"),
    ],
    child_sets: &[],
    parent_attr: None,
    lock: LockLevel::None,
    unique_name: true,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Org {
    pub name: String,
    pub full_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// `0` means unlimited.
    #[serde(default)]
    pub deployed_vm_quota: Option<i64>,
    #[serde(default)]
    pub stored_vm_quota: Option<i64>,
    #[serde(default)]
    pub metadata: Vec<MetadataEntry>,
}

impl Resource for Org {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Org
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self) -> Result<(), SchemaError> {
        require_name(self.kind(), &self.name)?;
        require_non_negative(self.kind(), &self.name, "deployed_vm_quota", self.deployed_vm_quota)?;
        require_non_negative(self.kind(), &self.name, "stored_vm_quota", self.stored_vm_quota)?;
        validate_metadata(self.kind(), &self.name, &self.metadata)
    }

    fn parent(&self) -> Option<ParentRef> {
        None
    }

    fn to_attributes(&self) -> Attributes {
        let mut a = Attributes::new();
        a.insert("name".to_owned(), AttrValue::from(&self.name));
        a.insert("full_name".to_owned(), AttrValue::from(&self.full_name));
        a.insert("description".to_owned(), AttrValue::from(&self.description));
        a.insert("enabled".to_owned(), AttrValue::Bool(self.enabled));
        insert_opt(&mut a, "deployed_vm_quota", self.deployed_vm_quota);
        insert_opt(&mut a, "stored_vm_quota", self.stored_vm_quota);
        a.insert(
            "metadata_entry".to_owned(),
            AttrValue::List(metadata_value(&self.metadata)),
        );
        a
    }

    fn diff(&self, observed: &Attributes) -> AttributeDiff {
        DiffBuilder::new(observed)
            .field("name", &self.name)
            .field("full_name", &self.full_name)
            .field("description", &self.description)
            .field("enabled", self.enabled)
            .optional("deployed_vm_quota", self.deployed_vm_quota)
            .optional("stored_vm_quota", self.stored_vm_quota)
            .list("metadata_entry", metadata_value(&self.metadata))
            .finish()
    }
}
