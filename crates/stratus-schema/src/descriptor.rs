use crate::types::{ResourceId, ScopeKey};
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How an attribute may change on a live object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutability {
    /// Changing it requires destroying and re-creating the object.
    Immutable,
    /// Updated in place.
    Mutable,
    /// Assigned by the remote platform; never sent.
    Computed,
}

/// Remote endpoint family that applies an attribute update.
///
/// Each group becomes its own update operation so that a failure in one does not
/// block or duplicate the others. Declaration order is application order:
/// placement references come after core fields and before publish, network and
/// metadata settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateGroup {
    Core,
    Placement,
    Publish,
    Network,
    Metadata,
}

impl fmt::Display for UpdateGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateGroup::Core => write!(f, "core"),
            UpdateGroup::Placement => write!(f, "placement"),
            UpdateGroup::Publish => write!(f, "publish"),
            UpdateGroup::Network => write!(f, "network"),
            UpdateGroup::Metadata => write!(f, "metadata"),
        }
    }
}

/// Which shared object must be locked while mutating an instance of a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockLevel {
    /// Mutations never touch a shared parent.
    None,
    /// Lock the direct parent (e.g. the edge gateway of a NAT rule).
    Parent,
    /// Lock the true owner of the parent: a VDC that belongs to a VDC group
    /// resolves to the group.
    Owner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeDescriptor {
    pub name: &'static str,
    pub mutability: Mutability,
    pub group: UpdateGroup,
}

impl AttributeDescriptor {
    pub const fn immutable(name: &'static str) -> Self {
        Self {
            name,
            mutability: Mutability::Immutable,
            group: UpdateGroup::Core,
        }
    }

    pub const fn mutable(name: &'static str, group: UpdateGroup) -> Self {
        Self {
            name,
            mutability: Mutability::Mutable,
            group,
        }
    }

    pub const fn computed(name: &'static str) -> Self {
        Self {
            name,
            mutability: Mutability::Computed,
            group: UpdateGroup::Core,
        }
    }
}

/// A child collection owned by a resource (storage profiles, ACL entries, rules).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildSetDescriptor {
    pub name: &'static str,
    /// Attribute holding the natural key of each record.
    pub key: &'static str,
    /// Boolean attribute that exactly one record must carry.
    pub exclusive: Option<&'static str>,
    /// Whether the remote platform honours record order.
    pub ordered: bool,
}

#[derive(Debug)]
pub struct ResourceDescriptor {
    pub kind: ResourceKind,
    pub attributes: &'static [AttributeDescriptor],
    pub child_sets: &'static [ChildSetDescriptor],
    /// Attribute that carries the parent identifier, if the kind has a parent.
    pub parent_attr: Option<&'static str>,
    pub lock: LockLevel,
    /// Names are unique within the parent, so a re-issued create is rejected
    /// rather than producing a duplicate.
    pub unique_name: bool,
}

impl ResourceDescriptor {
    pub fn attribute(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn child_set(&self, name: &str) -> Option<&ChildSetDescriptor> {
        self.child_sets.iter().find(|c| c.name == name)
    }

    pub fn is_computed(&self, name: &str) -> bool {
        self.attribute(name)
            .is_some_and(|a| a.mutability == Mutability::Computed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Org,
    Vdc,
    VdcGroup,
    Catalog,
    #[serde(rename = "vapp")]
    VApp,
    Vm,
    EdgeGateway,
    RoutedNetwork,
    NatRule,
    Firewall,
    AccessControl,
    RdeType,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 12] = [
        ResourceKind::Org,
        ResourceKind::Vdc,
        ResourceKind::VdcGroup,
        ResourceKind::Catalog,
        ResourceKind::VApp,
        ResourceKind::Vm,
        ResourceKind::EdgeGateway,
        ResourceKind::RoutedNetwork,
        ResourceKind::NatRule,
        ResourceKind::Firewall,
        ResourceKind::AccessControl,
        ResourceKind::RdeType,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Org => "org",
            ResourceKind::Vdc => "vdc",
            ResourceKind::VdcGroup => "vdc_group",
            ResourceKind::Catalog => "catalog",
            ResourceKind::VApp => "vapp",
            ResourceKind::Vm => "vm",
            ResourceKind::EdgeGateway => "edge_gateway",
            ResourceKind::RoutedNetwork => "routed_network",
            ResourceKind::NatRule => "nat_rule",
            ResourceKind::Firewall => "firewall",
            ResourceKind::AccessControl => "access_control",
            ResourceKind::RdeType => "rde_type",
        }
    }

    pub fn descriptor(self) -> &'static ResourceDescriptor {
        use crate::resources::{access, catalog, network, org, rde, vapp, vdc};
        match self {
            ResourceKind::Org => &org::ORG,
            ResourceKind::Vdc => &vdc::VDC,
            ResourceKind::VdcGroup => &vdc::VDC_GROUP,
            ResourceKind::Catalog => &catalog::CATALOG,
            ResourceKind::VApp => &vapp::VAPP,
            ResourceKind::Vm => &vapp::VM,
            ResourceKind::EdgeGateway => &network::EDGE_GATEWAY,
            ResourceKind::RoutedNetwork => &network::ROUTED_NETWORK,
            ResourceKind::NatRule => &network::NAT_RULE,
            ResourceKind::Firewall => &network::FIREWALL,
            ResourceKind::AccessControl => &access::ACCESS_CONTROL,
            ResourceKind::RdeType => &rde::RDE_TYPE,
        }
    }

    /// Kinds named by the leading segments of an import path, outermost first.
    ///
    /// Kinds without a name of their own (firewall, access control) are
    /// addressed by the name of the object they are attached to.
    pub fn import_ancestors(self) -> &'static [ResourceKind] {
        match self {
            ResourceKind::Org | ResourceKind::RdeType => &[],
            ResourceKind::Vdc
            | ResourceKind::VdcGroup
            | ResourceKind::Catalog
            | ResourceKind::Firewall
            | ResourceKind::AccessControl => &[ResourceKind::Org],
            ResourceKind::VApp | ResourceKind::EdgeGateway | ResourceKind::RoutedNetwork => {
                &[ResourceKind::Org, ResourceKind::Vdc]
            }
            ResourceKind::Vm => &[ResourceKind::Org, ResourceKind::VApp],
            ResourceKind::NatRule => &[ResourceKind::Org, ResourceKind::EdgeGateway],
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| SchemaError::UnknownKind(s.to_owned()))
    }
}

/// Reference to the owning object of an instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParentRef {
    pub kind: ResourceKind,
    pub id: ResourceId,
}

impl ParentRef {
    pub fn new(kind: ResourceKind, id: impl Into<ResourceId>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn scope_key(&self) -> ScopeKey {
        ScopeKey::new(format!("{}:{}", self.kind, self.id))
    }
}

impl fmt::Display for ParentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_roundtrip_through_str() {
        for kind in ResourceKind::ALL {
            assert_eq!(kind.as_str().parse::<ResourceKind>().unwrap(), kind);
        }
        assert!("bogus".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn kind_serde_matches_as_str() {
        for kind in ResourceKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn every_descriptor_matches_its_kind() {
        for kind in ResourceKind::ALL {
            assert_eq!(kind.descriptor().kind, kind);
        }
    }

    #[test]
    fn parent_attribute_is_declared() {
        for kind in ResourceKind::ALL {
            let d = kind.descriptor();
            if let Some(attr) = d.parent_attr {
                assert!(d.attribute(attr).is_some(), "{kind}: parent attr {attr} undeclared");
            }
            if d.lock != LockLevel::None {
                assert!(d.parent_attr.is_some(), "{kind}: lock level without parent");
            }
        }
    }

    #[test]
    fn child_set_keys_are_not_attributes() {
        for kind in ResourceKind::ALL {
            let d = kind.descriptor();
            for set in d.child_sets {
                assert!(d.attribute(set.name).is_none(), "{kind}: {} doubly declared", set.name);
            }
        }
    }

    #[test]
    fn update_groups_order_core_first() {
        assert!(UpdateGroup::Core < UpdateGroup::Placement);
        assert!(UpdateGroup::Placement < UpdateGroup::Publish);
        assert!(UpdateGroup::Publish < UpdateGroup::Metadata);
    }

    #[test]
    fn scope_key_qualifies_kind() {
        let p = ParentRef::new(ResourceKind::VdcGroup, "urn:vdcgroup:1");
        assert_eq!(p.scope_key(), "vdc_group:urn:vdcgroup:1");
    }
}
