//! Per-user override programs.
//!
//! A user's own grants are compiled lazily, one program per namespace, and
//! kept in a bounded LRU with a TTL. Users without grants get an explicit
//! negative entry so the store is not asked again until it expires.
//!
//! Each compiled program remembers the namespace epoch it was built under
//! and is ignored once that namespace is torn down. Loads that race an
//! invalidation are discarded instead of cached.

use super::builder::TrieBuilder;
use super::program::Program;
use super::registry::Registry;
use crate::store::GrantRow;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Fallback capacity when configured with zero.
const DEFAULT_CAPACITY: NonZeroUsize = NonZeroUsize::new(10_000).unwrap();

#[derive(Debug, Clone)]
struct Compiled {
    epoch: u64,
    program: Arc<Program>,
}

/// Compiled grants of one user, indexed by namespace index.
#[derive(Debug, Clone, Default)]
pub struct UserPrograms {
    by_ns: Vec<Option<Compiled>>,
}

impl UserPrograms {
    /// Compile a user's grant rows. Returns `None` when nothing usable
    /// remains (no rows, or only rows for inactive namespaces).
    pub fn compile(rows: &[GrantRow], registry: &mut Registry) -> Option<Self> {
        let mut by_key: BTreeMap<&str, Vec<&GrantRow>> = BTreeMap::new();
        for row in rows {
            by_key.entry(row.ns_key.as_str()).or_default().push(row);
        }

        let mut by_ns: Vec<Option<Compiled>> = vec![None; registry.len()];
        let mut compiled = 0usize;
        for (ns_key, rows) in by_key {
            let Some(state) = registry.get_active_mut(ns_key) else {
                debug!(ns = %ns_key, "skipping user grants for inactive namespace");
                continue;
            };
            let mut builder = TrieBuilder::new();
            for row in rows {
                match state.intern_local(&row.local) {
                    Ok(path) => builder.set(row.kind, &path, row.effect),
                    Err(e) => {
                        warn!(user = %row.subject_id, ns = %ns_key, local = %row.local, error = %e, "skipping malformed user grant")
                    }
                }
            }
            by_ns[state.index() as usize] = Some(Compiled {
                epoch: state.epoch(),
                program: Arc::new(builder.freeze()),
            });
            compiled += 1;
        }

        (compiled > 0).then_some(Self { by_ns })
    }

    /// Program for a namespace, provided it was compiled under `epoch`.
    #[inline]
    pub fn program(&self, ns_index: u32, epoch: u64) -> Option<&Program> {
        match self.by_ns.get(ns_index as usize)? {
            Some(compiled) if compiled.epoch == epoch => Some(&compiled.program),
            _ => None,
        }
    }

    /// Number of namespaces with a compiled program.
    pub fn namespace_count(&self) -> usize {
        self.by_ns.iter().filter(|p| p.is_some()).count()
    }
}

/// Result of a non-loading cache lookup.
#[derive(Debug, Clone)]
pub enum OverridePeek {
    /// Warm entry with compiled programs.
    Programs(Arc<UserPrograms>),
    /// Warm entry: the user has no grants.
    Negative,
    /// Miss or expired. Callers must load, never guess.
    Unknown,
}

#[derive(Debug, Clone)]
struct Entry {
    programs: Option<Arc<UserPrograms>>,
    expires_at: Instant,
}

/// TTL + LRU cache of compiled user overrides.
#[derive(Debug)]
pub struct UserOverrideCache {
    entries: Mutex<LruCache<String, Entry>>,
    /// Bumped by every invalidation, before the entry is dropped.
    generation: AtomicU64,
    ttl: Duration,
}

impl UserOverrideCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(DEFAULT_CAPACITY);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            generation: AtomicU64::new(0),
            ttl,
        }
    }

    /// Synchronous lookup. Touches the entry's LRU position on a hit.
    pub fn peek(&self, user_id: &str) -> OverridePeek {
        let mut entries = self.entries.lock();
        let fresh = match entries.get(user_id) {
            None => return OverridePeek::Unknown,
            Some(entry) if entry.expires_at <= Instant::now() => None,
            Some(entry) => Some(match &entry.programs {
                Some(programs) => OverridePeek::Programs(Arc::clone(programs)),
                None => OverridePeek::Negative,
            }),
        };
        fresh.unwrap_or_else(|| {
            entries.pop(user_id);
            OverridePeek::Unknown
        })
    }

    /// Current invalidation generation. Capture it before loading a user's
    /// grants and hand it back to [`insert`](Self::insert).
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Store a freshly compiled entry (or a negative one) loaded at
    /// `generation`. Nothing is cached if an invalidation happened since;
    /// the programs are still returned for the caller's own use.
    pub fn insert(
        &self,
        user_id: &str,
        programs: Option<UserPrograms>,
        generation: u64,
    ) -> Option<Arc<UserPrograms>> {
        let programs = programs.map(Arc::new);
        let mut entries = self.entries.lock();
        if self.generation() != generation {
            debug!(user = %user_id, "user override load raced an invalidation, not cached");
            return programs;
        }
        let entry = Entry {
            programs: programs.clone(),
            expires_at: Instant::now() + self.ttl,
        };
        if let Some((evicted, _)) = entries.push(user_id.to_string(), entry)
            && evicted != user_id
        {
            debug!(user = %evicted, "user override entry evicted");
        }
        programs
    }

    pub fn invalidate(&self, user_id: &str) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.entries.lock().pop(user_id);
    }

    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        let mut entries = self.entries.lock();
        if !entries.is_empty() {
            debug!(entries = entries.len(), "user override cache cleared");
        }
        entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perm::{Decision, DeclareOptions, Effect, RuleKind, SubjectType};

    fn row(ns: &str, local: &str, effect: Effect) -> GrantRow {
        GrantRow {
            subject_type: SubjectType::User,
            subject_id: "u1".to_string(),
            ns_key: ns.to_string(),
            kind: RuleKind::Exact,
            local: local.to_string(),
            effect,
            updated_at: 0,
        }
    }

    fn registry() -> Registry {
        let mut r = Registry::new();
        r.declare_exact("a", "x", DeclareOptions::deny()).unwrap();
        r.declare_exact("b", "y", DeclareOptions::deny()).unwrap();
        r
    }

    #[test]
    fn test_compile_groups_by_namespace() {
        let mut registry = registry();
        let programs = UserPrograms::compile(
            &[row("a", "x", Effect::Allow), row("b", "y", Effect::Deny)],
            &mut registry,
        )
        .unwrap();
        assert_eq!(programs.namespace_count(), 2);

        let b = registry.get("b").unwrap();
        let (path, _) = b.interner().lookup_local("y").unwrap();
        assert_eq!(
            programs.program(b.index(), b.epoch()).unwrap().decide(&path),
            Decision::Deny
        );
        assert!(programs.program(b.index(), b.epoch() + 1).is_none());
    }

    #[test]
    fn test_compile_without_usable_rows_is_negative() {
        let mut registry = registry();
        assert!(UserPrograms::compile(&[], &mut registry).is_none());
        assert!(UserPrograms::compile(&[row("gone", "x", Effect::Allow)], &mut registry).is_none());
    }

    #[test]
    fn test_peek_states() {
        let mut registry = registry();
        let cache = UserOverrideCache::new(8, Duration::from_secs(60));
        assert!(matches!(cache.peek("u1"), OverridePeek::Unknown));

        cache.insert("u1", None, cache.generation());
        assert!(matches!(cache.peek("u1"), OverridePeek::Negative));

        let programs = UserPrograms::compile(&[row("a", "x", Effect::Allow)], &mut registry);
        cache.insert("u1", programs, cache.generation());
        assert!(matches!(cache.peek("u1"), OverridePeek::Programs(_)));

        cache.invalidate("u1");
        assert!(matches!(cache.peek("u1"), OverridePeek::Unknown));
    }

    #[test]
    fn test_expired_entries_are_unknown() {
        let cache = UserOverrideCache::new(8, Duration::ZERO);
        cache.insert("u1", None, cache.generation());
        assert!(matches!(cache.peek("u1"), OverridePeek::Unknown));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lru_evicts_least_recently_touched() {
        let cache = UserOverrideCache::new(2, Duration::from_secs(60));
        cache.insert("u1", None, cache.generation());
        cache.insert("u2", None, cache.generation());
        // Touch u1 so u2 becomes the eviction candidate.
        assert!(matches!(cache.peek("u1"), OverridePeek::Negative));
        cache.insert("u3", None, cache.generation());
        assert!(matches!(cache.peek("u2"), OverridePeek::Unknown));
        assert!(matches!(cache.peek("u1"), OverridePeek::Negative));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_load_raced_by_invalidation_is_not_cached() {
        let mut registry = registry();
        let cache = UserOverrideCache::new(8, Duration::from_secs(60));
        let generation = cache.generation();

        // A revoke lands while the grants are being loaded.
        cache.invalidate("u1");

        let programs = UserPrograms::compile(&[row("a", "x", Effect::Allow)], &mut registry);
        assert!(cache.insert("u1", programs, generation).is_some());
        assert!(matches!(cache.peek("u1"), OverridePeek::Unknown));

        cache.insert("u1", None, cache.generation());
        assert!(matches!(cache.peek("u1"), OverridePeek::Negative));
        cache.clear();
        assert!(matches!(cache.peek("u1"), OverridePeek::Unknown));
    }
}
