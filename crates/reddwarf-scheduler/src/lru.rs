use std::collections::HashMap;
use std::hash::Hash;

/// Fixed-capacity map that evicts the least recently used entry.
///
/// Entries are stamped with a logical clock on every access; eviction scans
/// for the oldest stamp. Capacities here are small (per-node predicate
/// names), so the linear scan on insert is cheaper than maintaining a list.
#[derive(Debug, Clone)]
pub struct LruCache<K, V> {
    capacity: usize,
    clock: u64,
    entries: HashMap<K, (V, u64)>,
}

impl<K: Eq + Hash + Clone, V> LruCache<K, V> {
    /// Create a cache holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            clock: 0,
            entries: HashMap::new(),
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Look up an entry, marking it as recently used
    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.get_mut(key).map(|v| &*v)
    }

    /// Look up an entry mutably, marking it as recently used
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let now = self.tick();
        self.entries.get_mut(key).map(|(value, stamp)| {
            *stamp = now;
            value
        })
    }

    /// Look up an entry without touching its recency
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|(value, _)| value)
    }

    /// Insert or replace an entry. Returns the evicted entry, if the cache
    /// was full.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        let now = self.tick();
        if let Some(slot) = self.entries.get_mut(&key) {
            *slot = (value, now);
            return None;
        }

        let mut evicted = None;
        if self.entries.len() >= self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, (_, stamp))| *stamp)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                evicted = self.entries.remove_entry(&oldest).map(|(k, (v, _))| (k, v));
            }
        }

        self.entries.insert(key, (value, now));
        evicted
    }

    /// Remove an entry
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(value, _)| value)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_least_recently_used() {
        let mut cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);

        // Touch "a" so "b" becomes the oldest
        assert_eq!(cache.get(&"a"), Some(&1));

        let evicted = cache.insert("c", 3);
        assert_eq!(evicted, Some(("b", 2)));
        assert!(cache.contains_key(&"a"));
        assert!(cache.contains_key(&"c"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_replace_does_not_evict() {
        let mut cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.insert("a", 10), None);
        assert_eq!(cache.peek(&"a"), Some(&10));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_peek_does_not_touch() {
        let mut cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.peek(&"a"), Some(&1));

        let evicted = cache.insert("c", 3);
        assert_eq!(evicted.map(|(k, _)| k), Some("a"));
    }

    #[test]
    fn test_remove() {
        let mut cache = LruCache::new(4);
        cache.insert(1, "x");
        assert_eq!(cache.remove(&1), Some("x"));
        assert!(cache.is_empty());
        assert_eq!(cache.capacity(), 4);
    }
}
