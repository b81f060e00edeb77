use super::{
    default_true, metadata_value, require_name, require_non_negative, validate_metadata,
    MetadataEntry, Resource,
};
use crate::descriptor::{
    AttributeDescriptor as A, LockLevel, ParentRef, ResourceDescriptor, ResourceKind, UpdateGroup,
};
use crate::diff::{AttributeDiff, DiffBuilder};
use crate::types::ResourceId;
use crate::value::{insert_opt, AttrValue, Attributes};
use crate::SchemaError;
use serde::{Deserialize, Serialize};

pub static VAPP: ResourceDescriptor = ResourceDescriptor {
    kind: ResourceKind::VApp,
    attributes: &[
        A::immutable("name"),
        A::immutable("vdc_id"),
        A::mutable("description", UpdateGroup::Core),
        A::mutable("power_on", UpdateGroup::Core),
        A::mutable("lease_runtime_secs", UpdateGroup::Core),
        A::mutable("lease_storage_secs", UpdateGroup::Core),
        A::mutable("metadata_entry", UpdateGroup::Metadata),
        A::computed("href"),
        A::computed("created_at"),
        A::computed("status"),
    ],
    child_sets: &[],
    parent_attr: Some("vdc_id"),
    lock: LockLevel::None,
    unique_name: true,
};

pub static VM: ResourceDescriptor = ResourceDescriptor {
    kind: ResourceKind::Vm,
    attributes: &[
        A::mutable("name", UpdateGroup::Core),
        A::immutable("vapp_id"),
        A::immutable("template_id"),
        A::mutable("computer_name", UpdateGroup::Core),
        A::mutable("cpus", UpdateGroup::Core),
        A::mutable("memory_mb", UpdateGroup::Core),
        A::mutable("power_on", UpdateGroup::Core),
        A::mutable("storage_profile", UpdateGroup::Placement),
        A::mutable("sizing_policy_id", UpdateGroup::Placement),
        A::mutable("network_name", UpdateGroup::Network),
        A::mutable("metadata_entry", UpdateGroup::Metadata),
        A::computed("href"),
        A::computed("created_at"),
        A::computed("status"),
        A::computed("ip_address"),
    ],
    child_sets: &[],
    parent_attr: Some("vapp_id"),
    lock: LockLevel::Parent,
    unique_name: true,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VApp {
    pub name: String,
    pub vdc_id: ResourceId,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub power_on: bool,
    /// `0` means the lease never expires.
    #[serde(default)]
    pub lease_runtime_secs: Option<i64>,
    #[serde(default)]
    pub lease_storage_secs: Option<i64>,
    #[serde(default)]
    pub metadata: Vec<MetadataEntry>,
}

impl Resource for VApp {
    fn kind(&self) -> ResourceKind {
        ResourceKind::VApp
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self) -> Result<(), SchemaError> {
        let kind = self.kind();
        require_name(kind, &self.name)?;
        require_non_negative(kind, &self.name, "lease_runtime_secs", self.lease_runtime_secs)?;
        require_non_negative(kind, &self.name, "lease_storage_secs", self.lease_storage_secs)?;
        validate_metadata(kind, &self.name, &self.metadata)
    }

    fn parent(&self) -> Option<ParentRef> {
        Some(ParentRef::new(ResourceKind::Vdc, self.vdc_id.clone()))
    }

    fn to_attributes(&self) -> Attributes {
        let mut a = Attributes::new();
        a.insert("name".to_owned(), AttrValue::from(&self.name));
        a.insert("vdc_id".to_owned(), AttrValue::from(self.vdc_id.as_str()));
        a.insert("description".to_owned(), AttrValue::from(&self.description));
        a.insert("power_on".to_owned(), AttrValue::Bool(self.power_on));
        insert_opt(&mut a, "lease_runtime_secs", self.lease_runtime_secs);
        insert_opt(&mut a, "lease_storage_secs", self.lease_storage_secs);
        a.insert(
            "metadata_entry".to_owned(),
            AttrValue::List(metadata_value(&self.metadata)),
        );
        a
    }

    fn diff(&self, observed: &Attributes) -> AttributeDiff {
        DiffBuilder::new(observed)
            .field("name", &self.name)
            .field("vdc_id", self.vdc_id.as_str())
            .field("description", &self.description)
            .field("power_on", self.power_on)
            .optional("lease_runtime_secs", self.lease_runtime_secs)
            .optional("lease_storage_secs", self.lease_storage_secs)
            .list("metadata_entry", metadata_value(&self.metadata))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Vm {
    pub name: String,
    pub vapp_id: ResourceId,
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub computer_name: Option<String>,
    pub cpus: i64,
    pub memory_mb: i64,
    #[serde(default = "default_true")]
    pub power_on: bool,
    #[serde(default)]
    pub storage_profile: Option<String>,
    #[serde(default)]
    pub sizing_policy_id: Option<String>,
    #[serde(default)]
    pub network_name: Option<String>,
    #[serde(default)]
    pub metadata: Vec<MetadataEntry>,
}

impl Vm {
    fn effective_computer_name(&self) -> &str {
        self.computer_name.as_deref().unwrap_or(&self.name)
    }
}

impl Resource for Vm {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Vm
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self) -> Result<(), SchemaError> {
        let kind = self.kind();
        require_name(kind, &self.name)?;
        if self.cpus < 1 {
            return Err(SchemaError::invalid(kind, &self.name, "cpus must be >= 1"));
        }
        if self.memory_mb < 4 || self.memory_mb % 4 != 0 {
            return Err(SchemaError::invalid(
                kind,
                &self.name,
                format!("memory_mb must be a positive multiple of 4, got {}", self.memory_mb),
            ));
        }
        let computer_name = self.effective_computer_name();
        if computer_name.len() > 63
            || !computer_name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-')
        {
            return Err(SchemaError::invalid(
                kind,
                &self.name,
                format!("invalid computer name '{computer_name}'"),
            ));
        }
        validate_metadata(kind, &self.name, &self.metadata)
    }

    fn parent(&self) -> Option<ParentRef> {
        Some(ParentRef::new(ResourceKind::VApp, self.vapp_id.clone()))
    }

    fn to_attributes(&self) -> Attributes {
        let mut a = Attributes::new();
        a.insert("name".to_owned(), AttrValue::from(&self.name));
        a.insert("vapp_id".to_owned(), AttrValue::from(self.vapp_id.as_str()));
        insert_opt(&mut a, "template_id", self.template_id.clone());
        a.insert(
            "computer_name".to_owned(),
            AttrValue::from(self.effective_computer_name()),
        );
        a.insert("cpus".to_owned(), AttrValue::Int(self.cpus));
        a.insert("memory_mb".to_owned(), AttrValue::Int(self.memory_mb));
        a.insert("power_on".to_owned(), AttrValue::Bool(self.power_on));
        insert_opt(&mut a, "storage_profile", self.storage_profile.clone());
        insert_opt(&mut a, "sizing_policy_id", self.sizing_policy_id.clone());
        insert_opt(&mut a, "network_name", self.network_name.clone());
        a.insert(
            "metadata_entry".to_owned(),
            AttrValue::List(metadata_value(&self.metadata)),
        );
        a
    }

    fn diff(&self, observed: &Attributes) -> AttributeDiff {
        DiffBuilder::new(observed)
            .field("name", &self.name)
            .field("vapp_id", self.vapp_id.as_str())
            .optional("template_id", self.template_id.clone())
            .field("computer_name", self.effective_computer_name())
            .field("cpus", self.cpus)
            .field("memory_mb", self.memory_mb)
            .field("power_on", self.power_on)
            .optional("storage_profile", self.storage_profile.clone())
            .optional("sizing_policy_id", self.sizing_policy_id.clone())
            .optional("network_name", self.network_name.clone())
            .list("metadata_entry", metadata_value(&self.metadata))
            .finish()
    }
}
