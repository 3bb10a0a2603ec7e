//! Per-user role lists, already in evaluation order.
//!
//! Entries expire after a TTL. An expired entry is dropped when it is next
//! looked at, and a full map sweeps every expired entry before taking a new
//! one. Inserts carry the generation they were loaded under so a load that
//! raced an assignment change is never cached.

use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
struct CachedRoles {
    roles: Arc<[i64]>,
    loaded_at: Instant,
}

pub struct UserRoleCache {
    entries: DashMap<String, CachedRoles>,
    generation: AtomicU64,
    capacity: usize,
    ttl: Duration,
}

impl UserRoleCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            generation: AtomicU64::new(0),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// Cached role ids, or `None` on a miss. Expired entries are removed.
    pub fn peek(&self, user_id: &str) -> Option<Arc<[i64]>> {
        {
            let cached = self.entries.get(user_id)?;
            if cached.loaded_at.elapsed() < self.ttl {
                return Some(Arc::clone(&cached.roles));
            }
        }
        self.entries
            .remove_if(user_id, |_, cached| cached.loaded_at.elapsed() >= self.ttl);
        None
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Cache role ids loaded at `generation`. Skipped when an invalidation
    /// happened since, or when the map is full of live entries.
    pub fn insert(&self, user_id: &str, roles: Arc<[i64]>, generation: u64) {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(user_id) {
            let before = self.entries.len();
            self.entries
                .retain(|_, cached| cached.loaded_at.elapsed() < self.ttl);
            let removed = before.saturating_sub(self.entries.len());
            if removed > 0 {
                debug!(removed, "expired user role lists removed");
            }
            if self.entries.len() >= self.capacity {
                debug!(user = %user_id, "user role cache full, not cached");
                return;
            }
        }

        // The shard stays locked from the check to the write, so an
        // invalidation either lands first and is seen here, or removes the
        // entry after it is written.
        let entry = self.entries.entry(user_id.to_string());
        if self.generation() != generation {
            debug!(user = %user_id, "user role load raced an invalidation, not cached");
            return;
        }
        entry.insert(CachedRoles {
            roles,
            loaded_at: Instant::now(),
        });
    }

    pub fn invalidate(&self, user_id: &str) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.entries.remove(user_id);
    }

    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles(ids: &[i64]) -> Arc<[i64]> {
        ids.into()
    }

    #[test]
    fn test_peek_returns_live_entries() {
        let cache = UserRoleCache::new(8, Duration::from_secs(60));
        assert!(cache.peek("u1").is_none());
        cache.insert("u1", roles(&[3, 1]), cache.generation());
        assert_eq!(cache.peek("u1").as_deref(), Some(&[3, 1][..]));
    }

    #[test]
    fn test_expired_entry_removed_on_peek() {
        let cache = UserRoleCache::new(8, Duration::ZERO);
        cache.insert("u1", roles(&[1]), cache.generation());
        assert_eq!(cache.len(), 1);
        assert!(cache.peek("u1").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_one_shot_users_stay_bounded() {
        let cache = UserRoleCache::new(16, Duration::ZERO);
        for i in 0..500 {
            cache.insert(&format!("user{i}"), roles(&[1]), cache.generation());
            assert!(cache.len() <= 16);
        }
    }

    #[test]
    fn test_full_of_live_entries_skips_insert() {
        let cache = UserRoleCache::new(2, Duration::from_secs(60));
        cache.insert("u1", roles(&[1]), cache.generation());
        cache.insert("u2", roles(&[1]), cache.generation());
        cache.insert("u3", roles(&[1]), cache.generation());
        assert_eq!(cache.len(), 2);
        assert!(cache.peek("u3").is_none());

        // Refreshing an existing user still works when full.
        cache.insert("u1", roles(&[2, 1]), cache.generation());
        assert_eq!(cache.peek("u1").as_deref(), Some(&[2, 1][..]));
    }

    #[test]
    fn test_load_raced_by_invalidation_is_not_cached() {
        let cache = UserRoleCache::new(8, Duration::from_secs(60));
        let generation = cache.generation();
        cache.invalidate("u1");
        cache.insert("u1", roles(&[1]), generation);
        assert!(cache.peek("u1").is_none());

        let generation = cache.generation();
        cache.clear();
        cache.insert("u1", roles(&[1]), generation);
        assert!(cache.is_empty());
    }
}
