use crate::descriptor::ResourceKind;
use crate::SchemaError;
use std::fmt;

/// A parsed import path: `<org>.<parent>.<name>` with an optional trailing
/// 1-based position for objects that share a name.
///
/// The number of leading segments depends on the kind; see
/// [`ResourceKind::import_ancestors`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportPath {
    pub kind: ResourceKind,
    /// Names of the ancestors, outermost first.
    pub ancestors: Vec<String>,
    pub name: String,
    pub position: Option<usize>,
}

impl ImportPath {
    pub fn parse(kind: ResourceKind, input: &str, separator: &str) -> Result<Self, SchemaError> {
        let err = |reason: String| SchemaError::ImportPath {
            path: input.to_owned(),
            reason,
        };
        if separator.is_empty() {
            return Err(err("separator must not be empty".to_owned()));
        }
        let segments: Vec<&str> = input.split(separator).collect();
        if let Some(i) = segments.iter().position(|s| s.is_empty()) {
            return Err(err(format!("segment {} is empty", i + 1)));
        }

        let depth = kind.import_ancestors().len() + 1;
        let position = match segments.len() {
            n if n == depth => None,
            n if n == depth + 1 => {
                let last = segments[depth];
                match last.parse::<usize>() {
                    Ok(p) if p >= 1 => Some(p),
                    _ => {
                        return Err(err(format!(
                            "trailing segment '{last}' is not a position (1-based)"
                        )))
                    }
                }
            }
            n => {
                return Err(err(format!(
                    "{kind} expects {} or {} segments separated by '{separator}', got {n}",
                    depth,
                    depth + 1
                )))
            }
        };

        Ok(Self {
            kind,
            ancestors: segments[..depth - 1].iter().map(|s| (*s).to_owned()).collect(),
            name: segments[depth - 1].to_owned(),
            position,
        })
    }

    /// Render back with the given separator.
    pub fn render(&self, separator: &str) -> String {
        let mut parts: Vec<String> = self.ancestors.clone();
        parts.push(self.name.clone());
        if let Some(p) = self.position {
            parts.push(p.to_string());
        }
        parts.join(separator)
    }
}

impl fmt::Display for ImportPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.render("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_segment_path() {
        let p = ImportPath::parse(ResourceKind::Vm, "acme.web-app.web-1", ".").unwrap();
        assert_eq!(p.ancestors, vec!["acme", "web-app"]);
        assert_eq!(p.name, "web-1");
        assert_eq!(p.position, None);
    }

    #[test]
    fn trailing_position() {
        let p = ImportPath::parse(ResourceKind::NatRule, "acme.edge-1.dnat.2", ".").unwrap();
        assert_eq!(p.name, "dnat");
        assert_eq!(p.position, Some(2));
    }

    #[test]
    fn position_zero_rejected() {
        let err = ImportPath::parse(ResourceKind::NatRule, "acme.edge-1.dnat.0", ".").unwrap_err();
        assert!(err.to_string().contains("1-based"));
    }

    #[test]
    fn custom_separator_allows_dots_in_names() {
        let p = ImportPath::parse(ResourceKind::Vdc, "acme/vdc.eu.1", "/").unwrap();
        assert_eq!(p.ancestors, vec!["acme"]);
        assert_eq!(p.name, "vdc.eu.1");
        assert_eq!(p.render("/"), "acme/vdc.eu.1");
    }

    #[test]
    fn org_has_no_ancestors() {
        let p = ImportPath::parse(ResourceKind::Org, "acme", ".").unwrap();
        assert!(p.ancestors.is_empty());
        assert!(ImportPath::parse(ResourceKind::Org, "acme.vdc", ".").is_err());
    }

    #[test]
    fn rde_type_by_position() {
        let p = ImportPath::parse(ResourceKind::RdeType, "Widget|3", "|").unwrap();
        assert_eq!(p.name, "Widget");
        assert_eq!(p.position, Some(3));
    }

    #[test]
    fn wrong_depth_and_empty_segments() {
        assert!(ImportPath::parse(ResourceKind::Vm, "acme.web-1", ".").is_err());
        assert!(ImportPath::parse(ResourceKind::Vm, "acme..web-1", ".").is_err());
        assert!(ImportPath::parse(ResourceKind::Vm, "a.b.c", "").is_err());
    }
}
