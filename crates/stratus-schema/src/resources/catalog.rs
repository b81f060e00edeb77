use super::{metadata_value, require_name, validate_metadata, MetadataEntry, Resource};
use crate::descriptor::{
    AttributeDescriptor as A, LockLevel, ParentRef, ResourceDescriptor, ResourceKind, UpdateGroup,
};
use crate::diff::{AttributeDiff, DiffBuilder};
use crate::types::ResourceId;
use crate::value::{insert_opt, AttrValue, Attributes};
use crate::SchemaError;
use serde::{Deserialize, Serialize};

pub static CATALOG: ResourceDescriptor = ResourceDescriptor {
    kind: ResourceKind::Catalog,
    attributes: &[
        A::mutable("name", UpdateGroup::Core),
        A::immutable("org_id"),
        A::mutable("description", UpdateGroup::Core),
        A::mutable("storage_profile_id", UpdateGroup::Placement),
        A::mutable("publish_enabled", UpdateGroup::Publish),
        A::mutable("cache_enabled", UpdateGroup::Publish),
        A::mutable("preserve_identity", UpdateGroup::Publish),
        A::mutable("metadata_entry", UpdateGroup::Metadata),
        A::computed("href"),
        A::computed("created_at"),
        A::computed("publish_subscription_url"),
        A::computed("number_of_media"),
    ],
    child_sets: &[],
    parent_attr: Some("org_id"),
    lock: LockLevel::None,
    unique_name: true,
};

/// Catalog. Publish settings are applied through their own endpoint and
/// therefore form a separate update group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Catalog {
    pub name: String,
    pub org_id: ResourceId,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub storage_profile_id: Option<String>,
    #[serde(default)]
    pub publish_enabled: bool,
    #[serde(default)]
    pub cache_enabled: bool,
    #[serde(default)]
    pub preserve_identity: bool,
    #[serde(default)]
    pub metadata: Vec<MetadataEntry>,
}

impl Resource for Catalog {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Catalog
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self) -> Result<(), SchemaError> {
        require_name(self.kind(), &self.name)?;
        if self.cache_enabled && !self.publish_enabled {
            return Err(SchemaError::invalid(
                self.kind(),
                &self.name,
                "cache_enabled requires publish_enabled",
            ));
        }
        validate_metadata(self.kind(), &self.name, &self.metadata)
    }

    fn parent(&self) -> Option<ParentRef> {
        Some(ParentRef::new(ResourceKind::Org, self.org_id.clone()))
    }

    fn to_attributes(&self) -> Attributes {
        let mut a = Attributes::new();
        a.insert("name".to_owned(), AttrValue::from(&self.name));
        a.insert("org_id".to_owned(), AttrValue::from(self.org_id.as_str()));
        a.insert("description".to_owned(), AttrValue::from(&self.description));
        insert_opt(&mut a, "storage_profile_id", self.storage_profile_id.clone());
        a.insert(
            "publish_enabled".to_owned(),
            AttrValue::Bool(self.publish_enabled),
        );
        a.insert("cache_enabled".to_owned(), AttrValue::Bool(self.cache_enabled));
        a.insert(
            "preserve_identity".to_owned(),
            AttrValue::Bool(self.preserve_identity),
        );
        a.insert(
            "metadata_entry".to_owned(),
            AttrValue::List(metadata_value(&self.metadata)),
        );
        a
    }

    fn diff(&self, observed: &Attributes) -> AttributeDiff {
        DiffBuilder::new(observed)
            .field("name", &self.name)
            .field("org_id", self.org_id.as_str())
            .field("description", &self.description)
            .optional("storage_profile_id", self.storage_profile_id.clone())
            .field("publish_enabled", self.publish_enabled)
            .field("cache_enabled", self.cache_enabled)
            .field("preserve_identity", self.preserve_identity)
            .list("metadata_entry", metadata_value(&self.metadata))
            .finish()
    }
}
