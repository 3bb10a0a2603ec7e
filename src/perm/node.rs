//! Capability node string grammar.
//!
//! ```text
//! exact:  <ns>.<seg>(.<seg>)*
//! prefix: <ns>.<seg>(.<seg>)*.*
//! root:   <ns>.*
//! ```
//!
//! `*` is only legal as the trailing wildcard marker or as the sole root
//! wildcard token. Parsing borrows from the input and never allocates on
//! success.

use super::RuleKind;
use super::interner::scan_segments;
use crate::error::{PermError, PermResult};

/// A syntactically valid node string split into its parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedNode<'a> {
    pub ns: &'a str,
    pub kind: RuleKind,
    /// Exact local path, or the star prefix without the trailing `.*`
    /// (empty for a root wildcard).
    pub local: &'a str,
}

impl<'a> ParsedNode<'a> {
    /// Parse a full node string such as `shop.admin.*`.
    pub fn parse(node: &'a str) -> PermResult<Self> {
        let Some(dot) = node.find('.') else {
            return Err(if node.is_empty() {
                PermError::EmptyNamespace
            } else {
                PermError::MissingLocal(node.to_string())
            });
        };

        let ns = &node[..dot];
        validate_namespace(ns)?;

        let rest = &node[dot + 1..];
        if rest.is_empty() {
            return Err(PermError::EmptySegment(node.to_string()));
        }
        if rest == "*" {
            return Ok(Self {
                ns,
                kind: RuleKind::Star,
                local: "",
            });
        }
        if let Some(prefix) = rest.strip_suffix(".*") {
            if prefix.is_empty() {
                return Err(PermError::EmptySegment(node.to_string()));
            }
            check_segments(prefix, node)?;
            return Ok(Self {
                ns,
                kind: RuleKind::Star,
                local: prefix,
            });
        }
        check_segments(rest, node)?;
        Ok(Self {
            ns,
            kind: RuleKind::Exact,
            local: rest,
        })
    }

    pub fn is_root_star(&self) -> bool {
        self.kind == RuleKind::Star && self.local.is_empty()
    }
}

/// Namespace keys must be non-empty and may not contain `.` or `*`.
pub fn validate_namespace(ns: &str) -> PermResult<()> {
    if ns.is_empty() {
        return Err(PermError::EmptyNamespace);
    }
    if ns.contains('*') || ns.contains('.') {
        return Err(PermError::IllegalWildcard(ns.to_string()));
    }
    Ok(())
}

/// Validate the local part of an exact declaration.
pub fn validate_exact_local(ns: &str, local: &str) -> PermResult<()> {
    if local.is_empty() {
        return Err(PermError::MissingLocal(ns.to_string()));
    }
    check_segments(local, &format!("{ns}.{local}"))
}

/// Validate a star prefix. Empty means the root wildcard.
pub fn validate_star_prefix(ns: &str, prefix: &str) -> PermResult<()> {
    if prefix.is_empty() {
        return Ok(());
    }
    check_segments(prefix, &format!("{ns}.{prefix}.*"))
}

fn check_segments(local: &str, node: &str) -> PermResult<()> {
    if local.contains('*') {
        return Err(PermError::IllegalWildcard(node.to_string()));
    }
    scan_segments(local, |_| {}).map_err(|_| PermError::EmptySegment(node.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_exact() {
        let n = ParsedNode::parse("myplugin.command.reload").unwrap();
        assert_eq!(n.ns, "myplugin");
        assert_eq!(n.kind, RuleKind::Exact);
        assert_eq!(n.local, "command.reload");
    }

    #[test]
    fn test_parse_prefix_and_root_star() {
        let n = ParsedNode::parse("shop.admin.*").unwrap();
        assert_eq!((n.kind, n.local), (RuleKind::Star, "admin"));
        assert!(!n.is_root_star());

        let n = ParsedNode::parse("shop.*").unwrap();
        assert!(n.is_root_star());
    }

    #[test]
    fn test_parse_rejects_misplaced_wildcards() {
        for bad in ["shop.a*", "shop.*.a", "shop.a.*.*", "*.a", "shop.a.**", "sh*p.a"] {
            let err = ParsedNode::parse(bad).unwrap_err();
            assert!(
                matches!(err, PermError::IllegalWildcard(_)),
                "{bad} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_parse_rejects_empty_parts() {
        assert!(matches!(ParsedNode::parse(""), Err(PermError::EmptyNamespace)));
        assert!(matches!(ParsedNode::parse(".a"), Err(PermError::EmptyNamespace)));
        assert!(matches!(ParsedNode::parse("shop"), Err(PermError::MissingLocal(_))));
        assert!(matches!(ParsedNode::parse("shop."), Err(PermError::EmptySegment(_))));
        assert!(matches!(ParsedNode::parse("shop.a..b"), Err(PermError::EmptySegment(_))));
        assert!(matches!(ParsedNode::parse("shop.a."), Err(PermError::EmptySegment(_))));
        assert!(matches!(ParsedNode::parse("shop..*"), Err(PermError::EmptySegment(_))));
    }

    #[test]
    fn test_declaration_validators() {
        assert!(validate_exact_local("ns", "a.b").is_ok());
        assert!(matches!(validate_exact_local("ns", ""), Err(PermError::MissingLocal(_))));
        assert!(matches!(validate_exact_local("ns", "a.*"), Err(PermError::IllegalWildcard(_))));
        assert!(matches!(validate_exact_local("ns", ".a"), Err(PermError::EmptySegment(_))));
        assert!(validate_star_prefix("ns", "").is_ok());
        assert!(matches!(validate_star_prefix("ns", "*"), Err(PermError::IllegalWildcard(_))));
        assert!(matches!(validate_star_prefix("ns", "a."), Err(PermError::EmptySegment(_))));
    }
}
