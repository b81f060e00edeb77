use crate::sync::synchronize;
use crate::CoreError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use stratus_remote::DeletePolicy;
use stratus_schema::{
    observed_children, Attributes, ChildMutation, LockLevel, Mutability, ParentRef, Resource,
    ResourceKind, ResourceSpec, UpdateGroup,
};
use stratus_store::ResourceInstance;

/// One atomic remote operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Create {
        kind: ResourceKind,
        parent: Option<ParentRef>,
        attributes: Attributes,
    },
    /// Mutable attributes applied through one remote endpoint.
    UpdateFields {
        group: UpdateGroup,
        attributes: Attributes,
    },
    Child {
        set: String,
        mutation: ChildMutation,
    },
    Delete {
        policy: DeletePolicy,
    },
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create { kind, .. } => write!(f, "create {kind}"),
            Operation::UpdateFields { group, attributes } => {
                let names: Vec<&str> = attributes.keys().map(String::as_str).collect();
                write!(f, "update {group} [{}]", names.join(", "))
            }
            Operation::Child { set, mutation } => write!(f, "{set}: {mutation}"),
            Operation::Delete { policy } => write!(f, "delete ({policy})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedOperation {
    pub operation: Operation,
    /// Safe to re-issue when the remote reports the object busy.
    pub retryable: bool,
    pub requires_parent_lock: bool,
}

impl fmt::Display for PlannedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.operation.fmt(f)
    }
}

/// Ordered operations for one instance. Executed strictly in sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OperationPlan {
    pub operations: Vec<PlannedOperation>,
}

impl OperationPlan {
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlannedOperation> {
        self.operations.iter()
    }

    pub fn requires_lock(&self) -> bool {
        self.operations.iter().any(|o| o.requires_parent_lock)
    }

    pub fn descriptions(&self) -> Vec<String> {
        self.operations.iter().map(ToString::to_string).collect()
    }
}

struct PlanBuilder {
    locked: bool,
    operations: Vec<PlannedOperation>,
}

impl PlanBuilder {
    fn new(kind: ResourceKind) -> Self {
        Self {
            locked: kind.descriptor().lock != LockLevel::None,
            operations: Vec::new(),
        }
    }

    fn push(&mut self, operation: Operation, retryable: bool) {
        self.operations.push(PlannedOperation {
            operation,
            retryable,
            requires_parent_lock: self.locked,
        });
    }

    fn finish(self) -> OperationPlan {
        OperationPlan {
            operations: self.operations,
        }
    }
}

/// Plan the operations that move a remote object toward `desired`.
///
/// `observed` is `None` when no remote object is known, which yields a single
/// create. Otherwise changed immutable attributes fail the whole plan with
/// `RequiresReplacement`; mutable changes become one update per update group in
/// group order, followed by child-collection synchronization.
pub fn plan(
    desired: &ResourceSpec,
    observed: Option<&Attributes>,
) -> Result<OperationPlan, CoreError> {
    let kind = desired.kind();
    let desc = kind.descriptor();
    let mut builder = PlanBuilder::new(kind);

    let Some(observed) = observed else {
        // Child sets are validated up front so an invalid create never
        // reaches the remote.
        for child_set in desired.child_sets() {
            if let Some(set) = desc.child_set(child_set.name) {
                synchronize(set, &[], &child_set.records)?;
            }
        }
        let attributes: Attributes = desired
            .to_attributes()
            .into_iter()
            .filter(|(k, _)| !desc.is_computed(k))
            .collect();
        // Re-issuing a create is only safe where the remote rejects duplicates.
        builder.push(
            Operation::Create {
                kind,
                parent: desired.parent(),
                attributes,
            },
            desc.unique_name,
        );
        return Ok(builder.finish());
    };

    let diff = desired.diff(observed);

    // An immutable attribute the remote does not report cannot be compared
    // and is left alone.
    let replacement: Vec<String> = diff
        .changes
        .iter()
        .filter(|c| {
            desc.attribute(&c.name).map_or(true, |a| {
                a.mutability == Mutability::Immutable && c.observed.is_some()
            })
        })
        .map(|c| c.name.clone())
        .collect();
    if !replacement.is_empty() {
        return Err(CoreError::RequiresReplacement {
            kind,
            attributes: replacement,
        });
    }

    if let Some(parent_attr) = desc.parent_attr {
        if let (Some(change), true) = (diff.get(parent_attr), builder.locked) {
            return Err(CoreError::ConflictingLockScopes {
                kind,
                from: change
                    .observed
                    .as_ref()
                    .map_or_else(|| "<none>".to_owned(), ToString::to_string),
                to: change.desired.to_string(),
            });
        }
    }

    let mut groups: BTreeMap<UpdateGroup, Attributes> = BTreeMap::new();
    for change in &diff.changes {
        if let Some(attr) = desc.attribute(&change.name) {
            if attr.mutability == Mutability::Mutable {
                groups
                    .entry(attr.group)
                    .or_default()
                    .insert(change.name.clone(), change.desired.clone());
            }
        }
    }
    for (group, attributes) in groups {
        builder.push(Operation::UpdateFields { group, attributes }, true);
    }

    for child_set in desired.child_sets() {
        let Some(set) = desc.child_set(child_set.name) else {
            continue;
        };
        let existing = observed_children(set, observed)?;
        for mutation in synchronize(set, &existing, &child_set.records)? {
            builder.push(
                Operation::Child {
                    set: set.name.to_owned(),
                    mutation,
                },
                true,
            );
        }
    }

    Ok(builder.finish())
}

/// Plan for a stored instance: a create when it has no remote identity.
pub fn plan_instance(instance: &ResourceInstance) -> Result<OperationPlan, CoreError> {
    let observed = instance.id().map(|_| &instance.observed);
    plan(&instance.desired, observed)
}

pub fn plan_delete(instance: &ResourceInstance, policy: DeletePolicy) -> OperationPlan {
    let mut builder = PlanBuilder::new(instance.kind);
    builder.push(Operation::Delete { policy }, true);
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_schema::{parse_desired_str, AttrValue};

    fn spec(toml: &str) -> ResourceSpec {
        parse_desired_str(&format!("[[resource]]\nkey = \"k\"\n[resource.spec]\n{toml}"))
            .unwrap()
            .remove(0)
            .spec
    }

    fn catalog(desc: &str, publish: bool, env: &str) -> ResourceSpec {
        spec(&format!(
            "kind = \"catalog\"\nname = \"templates\"\norg_id = \"urn:org:1\"\ndescription = \"{desc}\"\npublish_enabled = {publish}\n[[resource.spec.metadata]]\nkey = \"env\"\nvalue = \"{env}\"\n"
        ))
    }

    /// Observed state as the remote would report right after creation.
    fn observed_after_create(desired: &ResourceSpec) -> Attributes {
        let mut a = desired.to_attributes();
        a.insert("href".to_owned(), AttrValue::from("https://x/catalog/1"));
        a
    }

    #[test]
    fn no_identity_plans_single_create() {
        let desired = catalog("d", false, "prod");
        let plan = plan(&desired, None).unwrap();
        assert_eq!(plan.len(), 1);
        let op = &plan.operations[0];
        assert!(op.retryable);
        assert!(!op.requires_parent_lock);
        let Operation::Create { attributes, parent, .. } = &op.operation else {
            panic!("expected create");
        };
        assert!(attributes.contains_key("name"));
        assert!(!attributes.contains_key("href"));
        assert_eq!(parent.as_ref().unwrap().kind, ResourceKind::Org);
    }

    #[test]
    fn converged_plan_is_empty() {
        let desired = catalog("d", false, "prod");
        let observed = observed_after_create(&desired);
        assert!(plan(&desired, Some(&observed)).unwrap().is_empty());
    }

    #[test]
    fn updates_split_by_group_in_order() {
        let before = catalog("d", false, "prod");
        let observed = observed_after_create(&before);
        let after = catalog("new", true, "staging");
        let plan = plan(&after, Some(&observed)).unwrap();
        assert_eq!(
            plan.descriptions(),
            vec![
                "update core [description]",
                "update publish [publish_enabled]",
                "update metadata [metadata_entry]",
            ]
        );
    }

    #[test]
    fn immutable_change_requires_replacement() {
        let before = catalog("d", false, "prod");
        let observed = observed_after_create(&before);
        let moved = spec(
            "kind = \"catalog\"\nname = \"templates\"\norg_id = \"urn:org:2\"\ndescription = \"other\"\n",
        );
        let err = plan(&moved, Some(&observed)).unwrap_err();
        let CoreError::RequiresReplacement { attributes, .. } = err else {
            panic!("expected replacement, got {err}");
        };
        assert_eq!(attributes, vec!["org_id"]);
    }

    #[test]
    fn unreported_immutable_attribute_is_ignored() {
        let desired = catalog("d", false, "prod");
        let mut observed = observed_after_create(&desired);
        observed.remove("org_id");
        assert!(plan(&desired, Some(&observed)).unwrap().is_empty());
    }

    #[test]
    fn create_with_two_defaults_rejected() {
        let vdc = spec(
            "kind = \"vdc\"\nname = \"v\"\norg_id = \"urn:org:1\"\nallocation_model = \"Flex\"\n[[resource.spec.storage_profiles]]\nname = \"a\"\ndefault = true\n[[resource.spec.storage_profiles]]\nname = \"b\"\ndefault = true\n",
        );
        assert!(matches!(
            plan(&vdc, None),
            Err(CoreError::InvalidChildSet { .. })
        ));
    }

    #[test]
    fn computed_attributes_never_sent() {
        let desired = catalog("d", true, "prod");
        let plan = plan(&desired, None).unwrap();
        let Operation::Create { attributes, .. } = &plan.operations[0].operation else {
            panic!("expected create");
        };
        let desc = ResourceKind::Catalog.descriptor();
        assert!(attributes.keys().all(|k| !desc.is_computed(k)));
    }

    #[test]
    fn explicit_zero_quota_is_planned() {
        let vdc = |limit: &str| {
            spec(&format!(
                "kind = \"vdc\"\nname = \"v\"\norg_id = \"urn:org:1\"\nallocation_model = \"Flex\"\n{limit}\n[[resource.spec.storage_profiles]]\nname = \"gold\"\ndefault = true\n"
            ))
        };
        let observed = vdc("").to_attributes();
        assert!(plan(&vdc(""), Some(&observed)).unwrap().is_empty());
        let plan = plan(&vdc("memory_limit_mb = 0"), Some(&observed)).unwrap();
        assert_eq!(plan.descriptions(), vec!["update core [memory_limit_mb]"]);
    }

    #[test]
    fn locked_kind_marks_every_operation() {
        let rule = spec(
            "kind = \"nat_rule\"\nname = \"ssh\"\nedge_gateway_id = \"urn:gw:1\"\nrule_type = \"DNAT\"\nexternal_address = \"203.0.113.5\"\ninternal_address = \"10.0.0.5\"\n",
        );
        let plan = plan(&rule, None).unwrap();
        assert!(plan.requires_lock());
        // Nat rule names are not unique, so a create must not be re-issued.
        assert!(!plan.operations[0].retryable);
    }
}
