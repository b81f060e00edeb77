use super::{
    default_true, metadata_value, require_name, require_non_negative, require_one_of,
    require_unique_keys, validate_metadata, ChildSet, MetadataEntry, Resource,
};
use crate::child::{children_value, ChildRecord};
use crate::descriptor::{
    AttributeDescriptor as A, ChildSetDescriptor, LockLevel, ParentRef, ResourceDescriptor,
    ResourceKind, UpdateGroup,
};
use crate::diff::{AttributeDiff, DiffBuilder};
use crate::types::ResourceId;
use crate::value::{insert_opt, AttrValue, Attributes};
use crate::SchemaError;
use serde::{Deserialize, Serialize};

pub const STORAGE_PROFILES: ChildSetDescriptor = ChildSetDescriptor {
    name: "storage_profiles",
    key: "name",
    exclusive: Some("default"),
    ordered: false,
};

pub static VDC: ResourceDescriptor = ResourceDescriptor {
    kind: ResourceKind::Vdc,
    attributes: &[
        A::mutable("name", UpdateGroup::Core),
        A::immutable("org_id"),
        A::immutable("allocation_model"),
        A::immutable("network_pool"),
        A::mutable("description", UpdateGroup::Core),
        A::mutable("enabled", UpdateGroup::Core),
        A::mutable("cpu_limit_mhz", UpdateGroup::Core),
        A::mutable("memory_limit_mb", UpdateGroup::Core),
        A::mutable("cpu_guaranteed_pct", UpdateGroup::Core),
        A::mutable("default_compute_policy_id", UpdateGroup::Placement),
        A::mutable("metadata_entry", UpdateGroup::Metadata),
        A::computed("href"),
        A::computed("created_at"),
        A::computed("vdc_group_id"),
    ],
    child_sets: &[STORAGE_PROFILES],
    parent_attr: Some("org_id"),
    lock: LockLevel::None,
    unique_name: true,
};

pub static VDC_GROUP: ResourceDescriptor = ResourceDescriptor {
    kind: ResourceKind::VdcGroup,
    attributes: &[
        A::mutable("name", UpdateGroup::Core),
        A::immutable("org_id"),
        A::immutable("starting_vdc_id"),
        A::mutable("description", UpdateGroup::Core),
        A::mutable("participating_vdc_ids", UpdateGroup::Core),
        A::mutable("dfw_enabled", UpdateGroup::Network),
        A::computed("href"),
        A::computed("created_at"),
    ],
    child_sets: &[],
    parent_attr: Some("org_id"),
    lock: LockLevel::None,
    unique_name: true,
};

const ALLOCATION_MODELS: &[&str] = &[
    "AllocationVApp",
    "AllocationPool",
    "ReservationPool",
    "Flex",
];

/// Storage profile assignment of a VDC. `limit_mb = 0` means unlimited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageProfile {
    pub name: String,
    #[serde(default)]
    pub limit_mb: i64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub default: bool,
}

impl StorageProfile {
    fn to_record(&self) -> ChildRecord {
        let mut a = Attributes::new();
        a.insert("name".to_owned(), AttrValue::from(&self.name));
        a.insert("limit_mb".to_owned(), AttrValue::Int(self.limit_mb));
        a.insert("enabled".to_owned(), AttrValue::Bool(self.enabled));
        a.insert("default".to_owned(), AttrValue::Bool(self.default));
        ChildRecord::new(&self.name, a)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Vdc {
    pub name: String,
    pub org_id: ResourceId,
    pub allocation_model: String,
    #[serde(default)]
    pub network_pool: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub cpu_limit_mhz: Option<i64>,
    #[serde(default)]
    pub memory_limit_mb: Option<i64>,
    #[serde(default)]
    pub cpu_guaranteed_pct: Option<i64>,
    #[serde(default)]
    pub default_compute_policy_id: Option<String>,
    #[serde(default)]
    pub storage_profiles: Vec<StorageProfile>,
    #[serde(default)]
    pub metadata: Vec<MetadataEntry>,
}

impl Resource for Vdc {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Vdc
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self) -> Result<(), SchemaError> {
        let kind = self.kind();
        require_name(kind, &self.name)?;
        require_one_of(
            kind,
            &self.name,
            "allocation_model",
            &self.allocation_model,
            ALLOCATION_MODELS,
        )?;
        require_non_negative(kind, &self.name, "cpu_limit_mhz", self.cpu_limit_mhz)?;
        require_non_negative(kind, &self.name, "memory_limit_mb", self.memory_limit_mb)?;
        if let Some(pct) = self.cpu_guaranteed_pct {
            if !(0..=100).contains(&pct) {
                return Err(SchemaError::invalid(
                    kind,
                    &self.name,
                    format!("cpu_guaranteed_pct must be 0-100, got {pct}"),
                ));
            }
        }
        if self.storage_profiles.is_empty() {
            return Err(SchemaError::invalid(
                kind,
                &self.name,
                "at least one storage profile is required",
            ));
        }
        for p in &self.storage_profiles {
            require_name(kind, &p.name)?;
            require_non_negative(kind, &self.name, "limit_mb", Some(p.limit_mb))?;
        }
        require_unique_keys(
            kind,
            &self.name,
            STORAGE_PROFILES.name,
            self.storage_profiles.iter().map(|p| p.name.as_str()),
        )?;
        validate_metadata(kind, &self.name, &self.metadata)
    }

    fn parent(&self) -> Option<ParentRef> {
        Some(ParentRef::new(ResourceKind::Org, self.org_id.clone()))
    }

    fn to_attributes(&self) -> Attributes {
        let mut a = Attributes::new();
        a.insert("name".to_owned(), AttrValue::from(&self.name));
        a.insert("org_id".to_owned(), AttrValue::from(self.org_id.as_str()));
        a.insert(
            "allocation_model".to_owned(),
            AttrValue::from(&self.allocation_model),
        );
        insert_opt(&mut a, "network_pool", self.network_pool.clone());
        a.insert("description".to_owned(), AttrValue::from(&self.description));
        a.insert("enabled".to_owned(), AttrValue::Bool(self.enabled));
        insert_opt(&mut a, "cpu_limit_mhz", self.cpu_limit_mhz);
        insert_opt(&mut a, "memory_limit_mb", self.memory_limit_mb);
        insert_opt(&mut a, "cpu_guaranteed_pct", self.cpu_guaranteed_pct);
        insert_opt(
            &mut a,
            "default_compute_policy_id",
            self.default_compute_policy_id.clone(),
        );
        let profiles: Vec<ChildRecord> = self
            .storage_profiles
            .iter()
            .map(StorageProfile::to_record)
            .collect();
        a.insert(STORAGE_PROFILES.name.to_owned(), children_value(&profiles));
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
            .field("allocation_model", &self.allocation_model)
            .optional("network_pool", self.network_pool.clone())
            .field("description", &self.description)
            .field("enabled", self.enabled)
            .optional("cpu_limit_mhz", self.cpu_limit_mhz)
            .optional("memory_limit_mb", self.memory_limit_mb)
            .optional("cpu_guaranteed_pct", self.cpu_guaranteed_pct)
            .optional(
                "default_compute_policy_id",
                self.default_compute_policy_id.clone(),
            )
            .list("metadata_entry", metadata_value(&self.metadata))
            .finish()
    }

    fn child_sets(&self) -> Vec<ChildSet> {
        vec![ChildSet {
            name: STORAGE_PROFILES.name,
            records: self
                .storage_profiles
                .iter()
                .map(StorageProfile::to_record)
                .collect(),
        }]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VdcGroup {
    pub name: String,
    pub org_id: ResourceId,
    pub starting_vdc_id: ResourceId,
    #[serde(default)]
    pub description: String,
    pub participating_vdc_ids: Vec<String>,
    #[serde(default)]
    pub dfw_enabled: bool,
}

impl Resource for VdcGroup {
    fn kind(&self) -> ResourceKind {
        ResourceKind::VdcGroup
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self) -> Result<(), SchemaError> {
        require_name(self.kind(), &self.name)?;
        if !self
            .participating_vdc_ids
            .iter()
            .any(|id| id == self.starting_vdc_id.as_str())
        {
            return Err(SchemaError::invalid(
                self.kind(),
                &self.name,
                "starting_vdc_id must be one of participating_vdc_ids",
            ));
        }
        require_unique_keys(
            self.kind(),
            &self.name,
            "participating_vdc_ids",
            self.participating_vdc_ids.iter().map(String::as_str),
        )
    }

    fn parent(&self) -> Option<ParentRef> {
        Some(ParentRef::new(ResourceKind::Org, self.org_id.clone()))
    }

    fn to_attributes(&self) -> Attributes {
        let mut a = Attributes::new();
        a.insert("name".to_owned(), AttrValue::from(&self.name));
        a.insert("org_id".to_owned(), AttrValue::from(self.org_id.as_str()));
        a.insert(
            "starting_vdc_id".to_owned(),
            AttrValue::from(self.starting_vdc_id.as_str()),
        );
        a.insert("description".to_owned(), AttrValue::from(&self.description));
        a.insert(
            "participating_vdc_ids".to_owned(),
            AttrValue::string_set(&self.participating_vdc_ids),
        );
        a.insert("dfw_enabled".to_owned(), AttrValue::Bool(self.dfw_enabled));
        a
    }

    fn diff(&self, observed: &Attributes) -> AttributeDiff {
        DiffBuilder::new(observed)
            .field("name", &self.name)
            .field("org_id", self.org_id.as_str())
            .field("starting_vdc_id", self.starting_vdc_id.as_str())
            .field("description", &self.description)
            .set("participating_vdc_ids", &self.participating_vdc_ids)
            .field("dfw_enabled", self.dfw_enabled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vdc() -> Vdc {
        Vdc {
            name: "prod".to_owned(),
            org_id: ResourceId::new("urn:vcloud:org:1"),
            allocation_model: "Flex".to_owned(),
            network_pool: None,
            description: String::new(),
            enabled: true,
            cpu_limit_mhz: Some(0),
            memory_limit_mb: None,
            cpu_guaranteed_pct: Some(20),
            default_compute_policy_id: None,
            storage_profiles: vec![
                StorageProfile {
                    name: "gold".to_owned(),
                    limit_mb: 0,
                    enabled: true,
                    default: true,
                },
                StorageProfile {
                    name: "silver".to_owned(),
                    limit_mb: 2048,
                    enabled: true,
                    default: false,
                },
            ],
            metadata: Vec::new(),
        }
    }

    #[test]
    fn valid_vdc_passes() {
        vdc().validate().unwrap();
    }

    #[test]
    fn unknown_allocation_model_rejected() {
        let mut v = vdc();
        v.allocation_model = "Elastic".to_owned();
        assert!(v.validate().is_err());
    }

    #[test]
    fn duplicate_profile_rejected() {
        let mut v = vdc();
        v.storage_profiles[1].name = "gold".to_owned();
        let err = v.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate key 'gold'"));
    }

    #[test]
    fn diff_excludes_child_set() {
        let v = vdc();
        let mut observed = v.to_attributes();
        observed.remove(STORAGE_PROFILES.name);
        assert!(v.diff(&observed).is_empty());
        assert_eq!(v.child_sets()[0].records.len(), 2);
    }

    #[test]
    fn computed_group_membership_ignored() {
        let v = vdc();
        let mut observed = v.to_attributes();
        observed.insert("vdc_group_id".to_owned(), AttrValue::from("urn:group:1"));
        assert!(v.diff(&observed).is_empty());
        assert!(VDC.is_computed("vdc_group_id"));
    }

    #[test]
    fn group_requires_starting_vdc_member() {
        let g = VdcGroup {
            name: "grp".to_owned(),
            org_id: ResourceId::new("urn:vcloud:org:1"),
            starting_vdc_id: ResourceId::new("urn:vdc:1"),
            description: String::new(),
            participating_vdc_ids: vec!["urn:vdc:2".to_owned()],
            dfw_enabled: false,
        };
        assert!(g.validate().is_err());
    }

    #[test]
    fn group_member_order_irrelevant() {
        let g = VdcGroup {
            name: "grp".to_owned(),
            org_id: ResourceId::new("urn:vcloud:org:1"),
            starting_vdc_id: ResourceId::new("urn:vdc:1"),
            description: String::new(),
            participating_vdc_ids: vec!["urn:vdc:2".to_owned(), "urn:vdc:1".to_owned()],
            dfw_enabled: true,
        };
        let mut observed = g.to_attributes();
        observed.insert(
            "participating_vdc_ids".to_owned(),
            AttrValue::from(vec!["urn:vdc:1", "urn:vdc:2"]),
        );
        assert!(g.diff(&observed).is_empty());
    }
}
