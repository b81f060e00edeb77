use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Attribute map as exchanged with the remote platform and kept as observed state.
pub type Attributes = BTreeMap<String, AttrValue>;

/// A single attribute value.
///
/// Absence is expressed by the key missing from an [`Attributes`] map, never by a
/// sentinel value, so `Int(0)` ("unlimited" for most quotas) stays distinguishable
/// from "unset".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<AttrValue>),
    Map(BTreeMap<String, AttrValue>),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[AttrValue]> {
        match self {
            AttrValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, AttrValue>> {
        match self {
            AttrValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Build a list of strings, sorted, for set-valued attributes whose order is
    /// not significant on the remote side.
    pub fn string_set<S: AsRef<str>>(items: &[S]) -> Self {
        let mut sorted: Vec<&str> = items.iter().map(AsRef::as_ref).collect();
        sorted.sort_unstable();
        sorted.dedup();
        AttrValue::List(sorted.into_iter().map(AttrValue::from).collect())
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Bool(b) => write!(f, "{b}"),
            AttrValue::Int(i) => write!(f, "{i}"),
            AttrValue::Str(s) => write!(f, "\"{s}\""),
            AttrValue::List(items) => write!(f, "[{} items]", items.len()),
            AttrValue::Map(m) => write!(f, "{{{} keys}}", m.len()),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Str(s.to_owned())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Str(s)
    }
}

impl From<&String> for AttrValue {
    fn from(s: &String) -> Self {
        AttrValue::Str(s.clone())
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        AttrValue::Bool(b)
    }
}

impl From<i64> for AttrValue {
    fn from(i: i64) -> Self {
        AttrValue::Int(i)
    }
}

impl From<Attributes> for AttrValue {
    fn from(m: Attributes) -> Self {
        AttrValue::Map(m)
    }
}

impl<T: Into<AttrValue>> From<Vec<T>> for AttrValue {
    fn from(items: Vec<T>) -> Self {
        AttrValue::List(items.into_iter().map(Into::into).collect())
    }
}

/// Insert `value` under `name` only when it is present.
pub fn insert_opt<T: Into<AttrValue>>(attrs: &mut Attributes, name: &str, value: Option<T>) {
    if let Some(v) = value {
        attrs.insert(name.to_owned(), v.into());
    }
}
