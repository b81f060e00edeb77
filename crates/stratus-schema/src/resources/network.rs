use super::{default_true, require_name, require_one_of, require_unique_keys, ChildSet, Resource};
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

pub static EDGE_GATEWAY: ResourceDescriptor = ResourceDescriptor {
    kind: ResourceKind::EdgeGateway,
    attributes: &[
        A::mutable("name", UpdateGroup::Core),
        A::mutable("owner_id", UpdateGroup::Core),
        A::mutable("owner_kind", UpdateGroup::Core),
        A::immutable("external_network_id"),
        A::mutable("description", UpdateGroup::Core),
        A::mutable("dedicate_external_network", UpdateGroup::Network),
        A::computed("href"),
        A::computed("created_at"),
        A::computed("primary_ip"),
    ],
    child_sets: &[],
    parent_attr: Some("owner_id"),
    lock: LockLevel::Owner,
    unique_name: true,
};

pub static ROUTED_NETWORK: ResourceDescriptor = ResourceDescriptor {
    kind: ResourceKind::RoutedNetwork,
    attributes: &[
        A::mutable("name", UpdateGroup::Core),
        A::immutable("owner_id"),
        A::immutable("owner_kind"),
        A::immutable("edge_gateway_id"),
        A::immutable("gateway"),
        A::immutable("prefix_length"),
        A::mutable("description", UpdateGroup::Core),
        A::mutable("dns1", UpdateGroup::Network),
        A::mutable("dns2", UpdateGroup::Network),
        A::computed("href"),
        A::computed("created_at"),
    ],
    child_sets: &[],
    parent_attr: Some("owner_id"),
    lock: LockLevel::Owner,
    unique_name: true,
};

pub static NAT_RULE: ResourceDescriptor = ResourceDescriptor {
    kind: ResourceKind::NatRule,
    attributes: &[
        A::mutable("name", UpdateGroup::Core),
        A::immutable("edge_gateway_id"),
        A::immutable("rule_type"),
        A::mutable("external_address", UpdateGroup::Core),
        A::mutable("internal_address", UpdateGroup::Core),
        A::mutable("dnat_external_port", UpdateGroup::Core),
        A::mutable("enabled", UpdateGroup::Core),
        A::mutable("priority", UpdateGroup::Core),
        A::mutable("description", UpdateGroup::Core),
        A::computed("href"),
        A::computed("created_at"),
    ],
    child_sets: &[],
    parent_attr: Some("edge_gateway_id"),
    lock: LockLevel::Parent,
    unique_name: false,
};

pub const FIREWALL_RULES: ChildSetDescriptor = ChildSetDescriptor {
    name: "rules",
    key: "name",
    exclusive: None,
    ordered: true,
};

pub static FIREWALL: ResourceDescriptor = ResourceDescriptor {
    kind: ResourceKind::Firewall,
    attributes: &[
        A::immutable("edge_gateway_id"),
        A::computed("href"),
        A::computed("created_at"),
    ],
    child_sets: &[FIREWALL_RULES],
    parent_attr: Some("edge_gateway_id"),
    lock: LockLevel::Parent,
    unique_name: true,
};

const OWNER_KINDS: &[&str] = &["vdc", "vdc_group"];
const NAT_RULE_TYPES: &[&str] = &["DNAT", "SNAT", "NO_DNAT", "NO_SNAT", "REFLEXIVE"];
const FIREWALL_ACTIONS: &[&str] = &["ALLOW", "DROP", "REJECT"];
const FIREWALL_DIRECTIONS: &[&str] = &["IN", "OUT", "IN_OUT"];
const IP_PROTOCOLS: &[&str] = &["IPV4", "IPV6", "IPV4_IPV6"];

fn validate_owner(kind: ResourceKind, name: &str, owner: &ParentRef) -> Result<(), SchemaError> {
    require_one_of(kind, name, "owner.kind", owner.kind.as_str(), OWNER_KINDS)
}

/// NSX-T edge gateway. Its owner is either a single VDC or a VDC group, and
/// moving it between owners is an in-place update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EdgeGateway {
    pub name: String,
    pub owner: ParentRef,
    pub external_network_id: ResourceId,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub dedicate_external_network: bool,
}

impl Resource for EdgeGateway {
    fn kind(&self) -> ResourceKind {
        ResourceKind::EdgeGateway
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self) -> Result<(), SchemaError> {
        require_name(self.kind(), &self.name)?;
        validate_owner(self.kind(), &self.name, &self.owner)
    }

    fn parent(&self) -> Option<ParentRef> {
        Some(self.owner.clone())
    }

    fn to_attributes(&self) -> Attributes {
        let mut a = Attributes::new();
        a.insert("name".to_owned(), AttrValue::from(&self.name));
        a.insert("owner_id".to_owned(), AttrValue::from(self.owner.id.as_str()));
        a.insert("owner_kind".to_owned(), AttrValue::from(self.owner.kind.as_str()));
        a.insert(
            "external_network_id".to_owned(),
            AttrValue::from(self.external_network_id.as_str()),
        );
        a.insert("description".to_owned(), AttrValue::from(&self.description));
        a.insert(
            "dedicate_external_network".to_owned(),
            AttrValue::Bool(self.dedicate_external_network),
        );
        a
    }

    fn diff(&self, observed: &Attributes) -> AttributeDiff {
        DiffBuilder::new(observed)
            .field("name", &self.name)
            .field("owner_id", self.owner.id.as_str())
            .field("owner_kind", self.owner.kind.as_str())
            .field("external_network_id", self.external_network_id.as_str())
            .field("description", &self.description)
            .field("dedicate_external_network", self.dedicate_external_network)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoutedNetwork {
    pub name: String,
    pub owner: ParentRef,
    pub edge_gateway_id: ResourceId,
    pub gateway: String,
    pub prefix_length: i64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub dns1: Option<String>,
    #[serde(default)]
    pub dns2: Option<String>,
}

impl Resource for RoutedNetwork {
    fn kind(&self) -> ResourceKind {
        ResourceKind::RoutedNetwork
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self) -> Result<(), SchemaError> {
        let kind = self.kind();
        require_name(kind, &self.name)?;
        validate_owner(kind, &self.name, &self.owner)?;
        if self.gateway.parse::<std::net::IpAddr>().is_err() {
            return Err(SchemaError::invalid(
                kind,
                &self.name,
                format!("gateway '{}' is not an IP address", self.gateway),
            ));
        }
        if !(1..=128).contains(&self.prefix_length) {
            return Err(SchemaError::invalid(
                kind,
                &self.name,
                format!("prefix_length {} out of range", self.prefix_length),
            ));
        }
        Ok(())
    }

    fn parent(&self) -> Option<ParentRef> {
        Some(self.owner.clone())
    }

    fn to_attributes(&self) -> Attributes {
        let mut a = Attributes::new();
        a.insert("name".to_owned(), AttrValue::from(&self.name));
        a.insert("owner_id".to_owned(), AttrValue::from(self.owner.id.as_str()));
        a.insert("owner_kind".to_owned(), AttrValue::from(self.owner.kind.as_str()));
        a.insert(
            "edge_gateway_id".to_owned(),
            AttrValue::from(self.edge_gateway_id.as_str()),
        );
        a.insert("gateway".to_owned(), AttrValue::from(&self.gateway));
        a.insert("prefix_length".to_owned(), AttrValue::Int(self.prefix_length));
        a.insert("description".to_owned(), AttrValue::from(&self.description));
        insert_opt(&mut a, "dns1", self.dns1.clone());
        insert_opt(&mut a, "dns2", self.dns2.clone());
        a
    }

    fn diff(&self, observed: &Attributes) -> AttributeDiff {
        DiffBuilder::new(observed)
            .field("name", &self.name)
            .field("owner_id", self.owner.id.as_str())
            .field("owner_kind", self.owner.kind.as_str())
            .field("edge_gateway_id", self.edge_gateway_id.as_str())
            .field("gateway", &self.gateway)
            .field("prefix_length", self.prefix_length)
            .field("description", &self.description)
            .optional("dns1", self.dns1.clone())
            .optional("dns2", self.dns2.clone())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NatRule {
    pub name: String,
    pub edge_gateway_id: ResourceId,
    pub rule_type: String,
    pub external_address: String,
    #[serde(default)]
    pub internal_address: Option<String>,
    #[serde(default)]
    pub dnat_external_port: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Lower values are evaluated first; `0` is a valid explicit priority.
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub description: String,
}

impl Resource for NatRule {
    fn kind(&self) -> ResourceKind {
        ResourceKind::NatRule
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self) -> Result<(), SchemaError> {
        let kind = self.kind();
        require_name(kind, &self.name)?;
        require_one_of(kind, &self.name, "rule_type", &self.rule_type, NAT_RULE_TYPES)?;
        let needs_internal = matches!(self.rule_type.as_str(), "DNAT" | "SNAT" | "REFLEXIVE");
        if needs_internal && self.internal_address.is_none() {
            return Err(SchemaError::invalid(
                kind,
                &self.name,
                format!("{} rules require internal_address", self.rule_type),
            ));
        }
        if self.dnat_external_port.is_some() && self.rule_type != "DNAT" {
            return Err(SchemaError::invalid(
                kind,
                &self.name,
                "dnat_external_port is only valid for DNAT rules",
            ));
        }
        if let Some(p) = self.priority {
            if p < 0 {
                return Err(SchemaError::invalid(kind, &self.name, "priority must be >= 0"));
            }
        }
        Ok(())
    }

    fn parent(&self) -> Option<ParentRef> {
        Some(ParentRef::new(
            ResourceKind::EdgeGateway,
            self.edge_gateway_id.clone(),
        ))
    }

    fn to_attributes(&self) -> Attributes {
        let mut a = Attributes::new();
        a.insert("name".to_owned(), AttrValue::from(&self.name));
        a.insert(
            "edge_gateway_id".to_owned(),
            AttrValue::from(self.edge_gateway_id.as_str()),
        );
        a.insert("rule_type".to_owned(), AttrValue::from(&self.rule_type));
        a.insert(
            "external_address".to_owned(),
            AttrValue::from(&self.external_address),
        );
        insert_opt(&mut a, "internal_address", self.internal_address.clone());
        insert_opt(&mut a, "dnat_external_port", self.dnat_external_port.clone());
        a.insert("enabled".to_owned(), AttrValue::Bool(self.enabled));
        insert_opt(&mut a, "priority", self.priority);
        a.insert("description".to_owned(), AttrValue::from(&self.description));
        a
    }

    fn diff(&self, observed: &Attributes) -> AttributeDiff {
        DiffBuilder::new(observed)
            .field("name", &self.name)
            .field("edge_gateway_id", self.edge_gateway_id.as_str())
            .field("rule_type", &self.rule_type)
            .field("external_address", &self.external_address)
            .optional("internal_address", self.internal_address.clone())
            .optional("dnat_external_port", self.dnat_external_port.clone())
            .field("enabled", self.enabled)
            .optional("priority", self.priority)
            .field("description", &self.description)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FirewallRuleSpec {
    pub name: String,
    pub action: String,
    #[serde(default = "default_direction")]
    pub direction: String,
    #[serde(default = "default_ip_protocol")]
    pub ip_protocol: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub source_ids: Vec<String>,
    #[serde(default)]
    pub destination_ids: Vec<String>,
}

fn default_direction() -> String {
    "IN_OUT".to_owned()
}

fn default_ip_protocol() -> String {
    "IPV4_IPV6".to_owned()
}

impl FirewallRuleSpec {
    fn to_record(&self) -> ChildRecord {
        let mut a = Attributes::new();
        a.insert("name".to_owned(), AttrValue::from(&self.name));
        a.insert("action".to_owned(), AttrValue::from(&self.action));
        a.insert("direction".to_owned(), AttrValue::from(&self.direction));
        a.insert("ip_protocol".to_owned(), AttrValue::from(&self.ip_protocol));
        a.insert("enabled".to_owned(), AttrValue::Bool(self.enabled));
        a.insert("source_ids".to_owned(), AttrValue::string_set(&self.source_ids));
        a.insert(
            "destination_ids".to_owned(),
            AttrValue::string_set(&self.destination_ids),
        );
        ChildRecord::new(&self.name, a)
    }
}

/// The ordered firewall rule list of one edge gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Firewall {
    pub edge_gateway_id: ResourceId,
    #[serde(default)]
    pub rules: Vec<FirewallRuleSpec>,
}

impl Resource for Firewall {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Firewall
    }

    fn name(&self) -> &str {
        self.edge_gateway_id.as_str()
    }

    fn validate(&self) -> Result<(), SchemaError> {
        let kind = self.kind();
        let name = self.name();
        for rule in &self.rules {
            require_name(kind, &rule.name)?;
            require_one_of(kind, name, "action", &rule.action, FIREWALL_ACTIONS)?;
            require_one_of(kind, name, "direction", &rule.direction, FIREWALL_DIRECTIONS)?;
            require_one_of(kind, name, "ip_protocol", &rule.ip_protocol, IP_PROTOCOLS)?;
        }
        require_unique_keys(
            kind,
            name,
            FIREWALL_RULES.name,
            self.rules.iter().map(|r| r.name.as_str()),
        )
    }

    fn parent(&self) -> Option<ParentRef> {
        Some(ParentRef::new(
            ResourceKind::EdgeGateway,
            self.edge_gateway_id.clone(),
        ))
    }

    fn to_attributes(&self) -> Attributes {
        let mut a = Attributes::new();
        a.insert(
            "edge_gateway_id".to_owned(),
            AttrValue::from(self.edge_gateway_id.as_str()),
        );
        let rules: Vec<ChildRecord> = self.rules.iter().map(FirewallRuleSpec::to_record).collect();
        a.insert(FIREWALL_RULES.name.to_owned(), children_value(&rules));
        a
    }

    fn diff(&self, observed: &Attributes) -> AttributeDiff {
        DiffBuilder::new(observed)
            .field("edge_gateway_id", self.edge_gateway_id.as_str())
            .finish()
    }

    fn child_sets(&self) -> Vec<ChildSet> {
        vec![ChildSet {
            name: FIREWALL_RULES.name,
            records: self.rules.iter().map(FirewallRuleSpec::to_record).collect(),
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway(owner: ParentRef) -> EdgeGateway {
        EdgeGateway {
            name: "edge-1".to_owned(),
            owner,
            external_network_id: ResourceId::new("urn:vcloud:extnet:1"),
            description: String::new(),
            dedicate_external_network: false,
        }
    }

    #[test]
    fn gateway_owner_must_be_vdc_or_group() {
        let ok = gateway(ParentRef::new(ResourceKind::VdcGroup, "urn:vdcgroup:1"));
        assert!(ok.validate().is_ok());
        let bad = gateway(ParentRef::new(ResourceKind::Org, "urn:org:1"));
        assert!(bad.validate().is_err());
    }

    #[test]
    fn gateway_move_is_owner_change() {
        let gw = gateway(ParentRef::new(ResourceKind::Vdc, "urn:vdc:1"));
        let observed = gw.to_attributes();
        let moved = gateway(ParentRef::new(ResourceKind::VdcGroup, "urn:vdcgroup:1"));
        let names: Vec<_> = moved.diff(&observed).names().map(str::to_owned).collect();
        assert_eq!(names, vec!["owner_id", "owner_kind"]);
    }

    #[test]
    fn dnat_requires_internal_address() {
        let rule = NatRule {
            name: "ssh".to_owned(),
            edge_gateway_id: ResourceId::new("urn:gw:1"),
            rule_type: "DNAT".to_owned(),
            external_address: "203.0.113.10".to_owned(),
            internal_address: None,
            dnat_external_port: Some("2222".to_owned()),
            enabled: true,
            priority: Some(0),
            description: String::new(),
        };
        assert!(rule.validate().is_err());
    }

    #[test]
    fn nat_priority_zero_is_managed() {
        let rule = NatRule {
            name: "snat".to_owned(),
            edge_gateway_id: ResourceId::new("urn:gw:1"),
            rule_type: "SNAT".to_owned(),
            external_address: "203.0.113.10".to_owned(),
            internal_address: Some("10.0.0.0/24".to_owned()),
            dnat_external_port: None,
            enabled: true,
            priority: Some(0),
            description: String::new(),
        };
        rule.validate().unwrap();
        let mut observed = rule.to_attributes();
        observed.insert("priority".to_owned(), AttrValue::Int(100));
        assert_eq!(rule.diff(&observed).names().collect::<Vec<_>>(), vec!["priority"]);
    }

    #[test]
    fn firewall_rules_are_ordered_children() {
        let fw = Firewall {
            edge_gateway_id: ResourceId::new("urn:gw:1"),
            rules: vec![
                FirewallRuleSpec {
                    name: "allow-web".to_owned(),
                    action: "ALLOW".to_owned(),
                    direction: default_direction(),
                    ip_protocol: default_ip_protocol(),
                    enabled: true,
                    source_ids: Vec::new(),
                    destination_ids: vec!["urn:ipset:web".to_owned()],
                },
                FirewallRuleSpec {
                    name: "drop-all".to_owned(),
                    action: "DROP".to_owned(),
                    direction: default_direction(),
                    ip_protocol: default_ip_protocol(),
                    enabled: true,
                    source_ids: Vec::new(),
                    destination_ids: Vec::new(),
                },
            ],
        };
        fw.validate().unwrap();
        let sets = fw.child_sets();
        assert_eq!(sets[0].records[0].key, "allow-web");
        assert!(FIREWALL_RULES.ordered);
    }

    #[test]
    fn routed_network_gateway_must_be_ip() {
        let net = RoutedNetwork {
            name: "app".to_owned(),
            owner: ParentRef::new(ResourceKind::Vdc, "urn:vdc:1"),
            edge_gateway_id: ResourceId::new("urn:gw:1"),
            gateway: "10.0.0.1".to_owned(),
            prefix_length: 24,
            description: String::new(),
            dns1: None,
            dns2: None,
        };
        assert!(net.validate().is_ok());
        let mut bad = net.clone();
        bad.gateway = "not-an-ip".to_owned();
        assert!(bad.validate().is_err());
    }
}
