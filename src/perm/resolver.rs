//! Node string resolution.
//!
//! Turns `ns.some.node` into a [`NodeRef`]: namespace index, compiled path
//! and the namespace epoch at resolve time. Authorization resolution is
//! LRU-cached by the literal node string; a cached reference is revalidated
//! against the registry on every hit.
//!
//! Three flavours:
//! - [`Resolver::resolve`]: authorization. Namespace must be active and the
//!   node covered by the catalog. Misses yield `None` (callers deny).
//! - [`Resolver::resolve_grant`]: grant writes. Same catalog requirement,
//!   but failures are errors and the result is a storable target.
//! - [`Resolver::resolve_revoke`]: revocation. Syntax only, so grants left
//!   behind by an unloaded plugin can still be cleaned up.

use super::node::ParsedNode;
use super::registry::Registry;
use super::{RuleKind, format_node};
use crate::error::{PermError, PermResult};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::debug;

/// Fallback capacity when configured with zero.
const DEFAULT_CAPACITY: NonZeroUsize = NonZeroUsize::new(4096).unwrap();

/// A resolved, compiled capability reference.
///
/// Only meaningful while its namespace is still at the captured epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRef {
    pub(crate) ns: u32,
    pub(crate) kind: RuleKind,
    pub(crate) path: Arc<[u32]>,
    pub(crate) epoch: u64,
    /// Interner size at resolve time when some segment was unknown.
    pub(crate) vocab: Option<u32>,
}

impl NodeRef {
    #[inline]
    pub fn ns_index(&self) -> u32 {
        self.ns
    }

    #[inline]
    pub fn kind(&self) -> RuleKind {
        self.kind
    }

    #[inline]
    pub fn path(&self) -> &[u32] {
        &self.path
    }

    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// True if the namespace is active at the captured epoch.
    #[inline]
    pub fn is_current(&self, registry: &Registry) -> bool {
        registry.is_current(self.ns, self.epoch)
    }

    /// Current, and no segment has since become known.
    pub(crate) fn is_fresh(&self, registry: &Registry) -> bool {
        let Some(state) = registry.namespace(self.ns) else {
            return false;
        };
        state.is_active()
            && state.epoch() == self.epoch
            && self.vocab.is_none_or(|v| v == state.interner().len())
    }
}

/// Storable target of a grant or revoke.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GrantTarget {
    pub ns_key: String,
    pub kind: RuleKind,
    pub local: String,
}

impl GrantTarget {
    pub fn node(&self) -> String {
        format_node(&self.ns_key, self.kind, &self.local)
    }
}

impl From<ParsedNode<'_>> for GrantTarget {
    fn from(parsed: ParsedNode<'_>) -> Self {
        Self {
            ns_key: parsed.ns.to_string(),
            kind: parsed.kind,
            local: parsed.local.to_string(),
        }
    }
}

/// LRU-cached node resolver.
#[derive(Debug)]
pub struct Resolver {
    cache: Mutex<LruCache<String, NodeRef>>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY.get())
    }
}

impl Resolver {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(DEFAULT_CAPACITY);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Resolve for authorization. `None` means "deny".
    pub fn resolve(&self, registry: &Registry, node: &str) -> Option<NodeRef> {
        if let Some(hit) = self.cache.lock().get(node)
            && hit.is_fresh(registry)
        {
            return Some(hit.clone());
        }

        let resolved = Self::resolve_uncached(registry, node)?;
        self.cache.lock().put(node.to_string(), resolved.clone());
        Some(resolved)
    }

    /// Resolve for authorization without touching the cache.
    pub fn resolve_uncached(registry: &Registry, node: &str) -> Option<NodeRef> {
        let parsed = ParsedNode::parse(node).ok()?;
        let state = registry.get(parsed.ns)?;
        if !state.is_active() || !state.covers(parsed.kind, parsed.local) {
            return None;
        }
        let (path, complete) = state.interner().lookup_local(parsed.local).ok()?;
        Some(NodeRef {
            ns: state.index(),
            kind: parsed.kind,
            path: path.into(),
            epoch: state.epoch(),
            vocab: (!complete).then(|| state.interner().len()),
        })
    }

    /// Resolve a grant target. The node must be covered by the catalog with
    /// a matching kind.
    pub fn resolve_grant(registry: &Registry, node: &str) -> PermResult<GrantTarget> {
        let parsed = ParsedNode::parse(node)?;
        let state = registry
            .get(parsed.ns)
            .filter(|ns| ns.is_active())
            .ok_or_else(|| PermError::UnknownNamespace(parsed.ns.to_string()))?;
        if !state.covers(parsed.kind, parsed.local) {
            return Err(PermError::Undeclared(node.to_string()));
        }
        Ok(parsed.into())
    }

    /// Resolve a revoke target. Syntax only; the catalog is not consulted.
    pub fn resolve_revoke(node: &str) -> PermResult<GrantTarget> {
        Ok(ParsedNode::parse(node)?.into())
    }

    /// Drop every cached reference.
    pub fn clear(&self) {
        let mut cache = self.cache.lock();
        if !cache.is_empty() {
            debug!(entries = cache.len(), "resolver cache cleared");
        }
        cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }
}
