use crate::value::{AttrValue, Attributes};
use serde::Serialize;

/// One attribute whose desired value differs from the observed one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributeChange {
    pub name: String,
    pub observed: Option<AttrValue>,
    pub desired: AttrValue,
}

/// Attribute-level difference between a typed desired resource and the
/// observed attribute map, produced by each kind's own diff function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AttributeDiff {
    pub changes: Vec<AttributeChange>,
}

impl AttributeDiff {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn get(&self, name: &str) -> Option<&AttributeChange> {
        self.changes.iter().find(|c| c.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.changes.iter().map(|c| c.name.as_str())
    }
}

/// Field-by-field comparison helper used by the per-kind diff functions.
///
/// Optional fields are compared only when the desired side is present: `None`
/// means the operator does not manage the attribute, while `Some(0)` is an
/// explicit value that must match remotely.
pub struct DiffBuilder<'a> {
    observed: &'a Attributes,
    diff: AttributeDiff,
}

impl<'a> DiffBuilder<'a> {
    pub fn new(observed: &'a Attributes) -> Self {
        Self {
            observed,
            diff: AttributeDiff::default(),
        }
    }

    #[must_use]
    pub fn field(mut self, name: &str, desired: impl Into<AttrValue>) -> Self {
        let desired = desired.into();
        let observed = self.observed.get(name);
        if observed != Some(&desired) {
            self.diff.changes.push(AttributeChange {
                name: name.to_owned(),
                observed: observed.cloned(),
                desired,
            });
        }
        self
    }

    #[must_use]
    pub fn optional<T: Into<AttrValue>>(self, name: &str, desired: Option<T>) -> Self {
        match desired {
            Some(v) => self.field(name, v),
            None => self,
        }
    }

    /// Compare an order-insensitive list of strings.
    #[must_use]
    pub fn set<S: AsRef<str>>(self, name: &str, desired: &[S]) -> Self {
        self.field(name, AttrValue::string_set(desired))
    }

    /// Compare a list-valued attribute where an absent observed value counts as
    /// an empty list.
    #[must_use]
    pub fn list(self, name: &str, desired: Vec<AttrValue>) -> Self {
        if desired.is_empty() && !self.observed.contains_key(name) {
            return self;
        }
        self.field(name, AttrValue::List(desired))
    }

    pub fn finish(self) -> AttributeDiff {
        self.diff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observed() -> Attributes {
        let mut a = Attributes::new();
        a.insert("name".to_owned(), AttrValue::from("web"));
        a.insert("cpus".to_owned(), AttrValue::Int(2));
        a.insert("tags".to_owned(), AttrValue::from(vec!["a", "b"]));
        a
    }

    #[test]
    fn equal_fields_produce_no_change() {
        let obs = observed();
        let diff = DiffBuilder::new(&obs)
            .field("name", "web")
            .field("cpus", 2_i64)
            .finish();
        assert!(diff.is_empty());
    }

    #[test]
    fn changed_field_records_both_sides() {
        let obs = observed();
        let diff = DiffBuilder::new(&obs).field("cpus", 4_i64).finish();
        let change = diff.get("cpus").unwrap();
        assert_eq!(change.observed, Some(AttrValue::Int(2)));
        assert_eq!(change.desired, AttrValue::Int(4));
    }

    #[test]
    fn unset_optional_is_unmanaged() {
        let obs = observed();
        let diff = DiffBuilder::new(&obs)
            .optional::<i64>("memory_limit_mb", None)
            .finish();
        assert!(diff.is_empty());
    }

    #[test]
    fn explicit_zero_differs_from_absent() {
        let obs = observed();
        let diff = DiffBuilder::new(&obs)
            .optional("memory_limit_mb", Some(0_i64))
            .finish();
        assert_eq!(diff.len(), 1);
        assert_eq!(diff.get("memory_limit_mb").unwrap().observed, None);
    }

    #[test]
    fn empty_list_matches_absent() {
        let obs = observed();
        let diff = DiffBuilder::new(&obs).list("metadata_entry", Vec::new()).finish();
        assert!(diff.is_empty());
    }

    #[test]
    fn set_comparison_ignores_order() {
        let obs = observed();
        let diff = DiffBuilder::new(&obs).set("tags", &["b", "a"]).finish();
        assert!(diff.is_empty());
    }
}
