//! `ShortLivedDedupeCache` (§4.H): drops duplicate channel-adapter
//! updates within a TTL window. Same `DashMap`-backed registry idiom as
//! `PerKeyLock`, paired with an insertion-order queue for FIFO eviction
//! once the cap is hit.

use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::Mutex;

use dashmap::DashMap;
use vigil_core::time::MonotonicMs;

const DEFAULT_TTL_MS: i64 = 120_000;
const DEFAULT_MAX_ENTRIES: usize = 10_000;

pub struct ShortLivedDedupeCache<K> {
    seen: DashMap<K, MonotonicMs>,
    order: Mutex<VecDeque<K>>,
    ttl_ms: i64,
    max_entries: usize,
}

impl<K> ShortLivedDedupeCache<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_TTL_MS, DEFAULT_MAX_ENTRIES)
    }

    pub fn with_limits(ttl_ms: i64, max_entries: usize) -> Self {
        Self { seen: DashMap::new(), order: Mutex::new(VecDeque::new()), ttl_ms, max_entries }
    }

    /// Returns `true` if `key` was already marked seen within the TTL
    /// window (a duplicate), else records it as seen and returns `false`.
    pub fn seen(&self, key: K, now: MonotonicMs) -> bool {
        if let Some(prev) = self.seen.get(&key) {
            if prev.age_ms(now) < self.ttl_ms {
                return true;
            }
        }

        self.seen.insert(key.clone(), now);
        let mut order = self.order.lock().unwrap();
        order.push_back(key);
        if order.len() > self.max_entries {
            if let Some(evicted) = order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl<K> Default for ShortLivedDedupeCache<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sighting_is_not_a_duplicate() {
        let cache = ShortLivedDedupeCache::new();
        assert!(!cache.seen("update-1".to_string(), MonotonicMs::from(0)));
    }

    #[test]
    fn repeat_within_ttl_is_a_duplicate() {
        let cache = ShortLivedDedupeCache::new();
        cache.seen("update-1".to_string(), MonotonicMs::from(0));
        assert!(cache.seen("update-1".to_string(), MonotonicMs::from(1_000)));
    }

    #[test]
    fn repeat_after_ttl_is_not_a_duplicate() {
        let cache = ShortLivedDedupeCache::with_limits(1_000, 10_000);
        cache.seen("update-1".to_string(), MonotonicMs::from(0));
        assert!(!cache.seen("update-1".to_string(), MonotonicMs::from(2_000)));
    }

    #[test]
    fn fifo_eviction_drops_oldest_when_over_cap() {
        let cache = ShortLivedDedupeCache::with_limits(120_000, 2);
        cache.seen("a".to_string(), MonotonicMs::from(0));
        cache.seen("b".to_string(), MonotonicMs::from(1));
        cache.seen("c".to_string(), MonotonicMs::from(2));

        assert_eq!(cache.len(), 2);
        assert!(!cache.seen("a".to_string(), MonotonicMs::from(3)), "evicted entries must be re-seeable");
    }
}
