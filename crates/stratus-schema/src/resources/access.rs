use super::{require_one_of, require_unique_keys, ChildSet, Resource};
use crate::child::{children_value, ChildRecord};
use crate::descriptor::{
    AttributeDescriptor as A, ChildSetDescriptor, LockLevel, ParentRef, ResourceDescriptor,
    ResourceKind, UpdateGroup,
};
use crate::diff::{AttributeDiff, DiffBuilder};
use crate::value::{insert_opt, AttrValue, Attributes};
use crate::SchemaError;
use serde::{Deserialize, Serialize};

pub const ACL_ENTRIES: ChildSetDescriptor = ChildSetDescriptor {
    name: "entries",
    key: "subject_id",
    exclusive: None,
    ordered: false,
};

pub static ACCESS_CONTROL: ResourceDescriptor = ResourceDescriptor {
    kind: ResourceKind::AccessControl,
    attributes: &[
        A::immutable("target_id"),
        A::immutable("target_kind"),
        A::mutable("shared_with_everyone", UpdateGroup::Core),
        A::mutable("everyone_access_level", UpdateGroup::Core),
        A::computed("href"),
    ],
    child_sets: &[ACL_ENTRIES],
    parent_attr: Some("target_id"),
    lock: LockLevel::Parent,
    unique_name: true,
};

const TARGET_KINDS: &[&str] = &["catalog", "vapp"];
const ACCESS_LEVELS: &[&str] = &["ReadOnly", "Change", "FullControl"];
const SUBJECT_TYPES: &[&str] = &["user", "group"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AclEntry {
    pub subject_id: String,
    #[serde(default = "default_subject_type")]
    pub subject_type: String,
    pub access_level: String,
}

fn default_subject_type() -> String {
    "user".to_owned()
}

impl AclEntry {
    fn to_record(&self) -> ChildRecord {
        let mut a = Attributes::new();
        a.insert("subject_id".to_owned(), AttrValue::from(&self.subject_id));
        a.insert("subject_type".to_owned(), AttrValue::from(&self.subject_type));
        a.insert("access_level".to_owned(), AttrValue::from(&self.access_level));
        ChildRecord::new(&self.subject_id, a)
    }
}

/// Sharing settings of a catalog or vApp.
///
/// The whole control is one remote document, so it is keyed by its target and
/// every mutation holds the target's lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccessControl {
    pub target: ParentRef,
    #[serde(default)]
    pub shared_with_everyone: bool,
    #[serde(default)]
    pub everyone_access_level: Option<String>,
    #[serde(default)]
    pub entries: Vec<AclEntry>,
}

impl Resource for AccessControl {
    fn kind(&self) -> ResourceKind {
        ResourceKind::AccessControl
    }

    fn name(&self) -> &str {
        self.target.id.as_str()
    }

    fn validate(&self) -> Result<(), SchemaError> {
        let kind = self.kind();
        let name = self.name();
        require_one_of(kind, name, "target.kind", self.target.kind.as_str(), TARGET_KINDS)?;
        match (&self.everyone_access_level, self.shared_with_everyone) {
            (Some(level), true) => {
                require_one_of(kind, name, "everyone_access_level", level, ACCESS_LEVELS)?;
            }
            (None, true) => {
                return Err(SchemaError::invalid(
                    kind,
                    name,
                    "shared_with_everyone requires everyone_access_level",
                ));
            }
            (Some(_), false) => {
                return Err(SchemaError::invalid(
                    kind,
                    name,
                    "everyone_access_level is only valid when shared_with_everyone is set",
                ));
            }
            (None, false) => {}
        }
        if self.shared_with_everyone && !self.entries.is_empty() {
            return Err(SchemaError::invalid(
                kind,
                name,
                "per-subject entries cannot be combined with shared_with_everyone",
            ));
        }
        for entry in &self.entries {
            require_one_of(kind, name, "subject_type", &entry.subject_type, SUBJECT_TYPES)?;
            require_one_of(kind, name, "access_level", &entry.access_level, ACCESS_LEVELS)?;
        }
        require_unique_keys(
            kind,
            name,
            ACL_ENTRIES.name,
            self.entries.iter().map(|e| e.subject_id.as_str()),
        )
    }

    fn parent(&self) -> Option<ParentRef> {
        Some(self.target.clone())
    }

    fn to_attributes(&self) -> Attributes {
        let mut a = Attributes::new();
        a.insert("target_id".to_owned(), AttrValue::from(self.target.id.as_str()));
        a.insert("target_kind".to_owned(), AttrValue::from(self.target.kind.as_str()));
        a.insert(
            "shared_with_everyone".to_owned(),
            AttrValue::Bool(self.shared_with_everyone),
        );
        insert_opt(
            &mut a,
            "everyone_access_level",
            self.everyone_access_level.clone(),
        );
        let entries: Vec<ChildRecord> = self.entries.iter().map(AclEntry::to_record).collect();
        a.insert(ACL_ENTRIES.name.to_owned(), children_value(&entries));
        a
    }

    fn diff(&self, observed: &Attributes) -> AttributeDiff {
        DiffBuilder::new(observed)
            .field("target_id", self.target.id.as_str())
            .field("target_kind", self.target.kind.as_str())
            .field("shared_with_everyone", self.shared_with_everyone)
            .optional("everyone_access_level", self.everyone_access_level.clone())
            .finish()
    }

    fn child_sets(&self) -> Vec<ChildSet> {
        vec![ChildSet {
            name: ACL_ENTRIES.name,
            records: self.entries.iter().map(AclEntry::to_record).collect(),
        }]
    }
}
