//! Owned table of pending operations with expiry.
//!
//! Entries are never swept by a background task; expiry is checked on every
//! access, so an expired entry is indistinguishable from a missing one.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// A keyed table whose entries expire after a fixed time-to-live.
#[derive(Debug, Clone)]
pub struct PendingTable<K, V> {
    entries: HashMap<K, Entry<V>>,
    ttl: Duration,
}

impl<K: Eq + Hash, V> PendingTable<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// Insert unless a live entry already exists for `key`.
    ///
    /// Returns `false` (and leaves the table untouched) if one does.
    pub fn try_insert(&mut self, key: K, value: V, now: Instant) -> bool {
        if self.get(&key, now).is_some() {
            return false;
        }
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at: now + self.ttl,
            },
        );
        true
    }

    /// Get a live entry.
    pub fn get(&self, key: &K, now: Instant) -> Option<&V> {
        self.entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| &entry.value)
    }

    /// Remove an entry, returning it only if it was still live.
    pub fn take(&mut self, key: &K, now: Instant) -> Option<V> {
        self.entries
            .remove(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value)
    }

    /// Whether any live entry exists.
    pub fn has_live(&self, now: Instant) -> bool {
        self.entries.values().any(|entry| entry.expires_at > now)
    }

    /// Drop expired entries.
    pub fn purge(&mut self, now: Instant) {
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let now = Instant::now();
        let mut table = PendingTable::new(Duration::from_secs(10));
        assert!(table.try_insert("a", 1, now));
        assert_eq!(table.get(&"a", now), Some(&1));
        assert!(table.has_live(now));
    }

    #[test]
    fn test_live_entry_blocks_insert() {
        let now = Instant::now();
        let mut table = PendingTable::new(Duration::from_secs(10));
        assert!(table.try_insert("a", 1, now));
        assert!(!table.try_insert("a", 2, now + Duration::from_secs(5)));
        assert_eq!(table.get(&"a", now), Some(&1));
    }

    #[test]
    fn test_expired_entry_is_absent() {
        let now = Instant::now();
        let later = now + Duration::from_secs(11);
        let mut table = PendingTable::new(Duration::from_secs(10));
        table.try_insert("a", 1, now);

        assert_eq!(table.get(&"a", later), None);
        assert!(!table.has_live(later));
        assert!(table.try_insert("a", 2, later));
        assert_eq!(table.get(&"a", later), Some(&2));
    }

    #[test]
    fn test_take_and_purge() {
        let now = Instant::now();
        let mut table = PendingTable::new(Duration::from_secs(10));
        table.try_insert("a", 1, now);
        table.try_insert("b", 2, now);

        assert_eq!(table.take(&"a", now), Some(1));
        assert_eq!(table.take(&"a", now), None);

        table.purge(now + Duration::from_secs(20));
        assert!(!table.has_live(now));
    }
}
