//! Bounded in-memory cache of decoded tables.
//!
//! The cache holds at most `capacity` tables keyed by dataset id. Inserting a
//! new id into a full cache evicts the least recently accessed entry. One
//! mutex guards the map; it is held only for the map operation itself and
//! never across file I/O or decoding.

use std::{
    num::NonZeroUsize,
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};

use log::debug;
use lru::LruCache;
use parking_lot::Mutex;

use crate::table::Table;

/// A cached table and the time it was last read or written.
///
/// Eviction order is the `LruCache` recency list; `last_access` mirrors it
/// as a wall-clock value for callers.
#[derive(Debug, Clone)]
struct CacheEntry {
    table: Table,
    last_access: Instant,
}

/// Counters describing cache effectiveness since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// `get` calls that found an entry.
    pub hits: u64,
    /// `get` calls that found nothing.
    pub misses: u64,
    /// Entries dropped to make room for new ones.
    pub evictions: u64,
}

/// Recency-ordered table cache shared between threads.
#[derive(Debug)]
pub struct TableCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl TableCache {
    /// Create a cache holding at most `capacity` tables.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up `dataset_id`, marking it most recently used on a hit.
    pub fn get(&self, dataset_id: &str) -> Option<Table> {
        let found = {
            let mut entries = self.entries.lock();
            entries.get_mut(dataset_id).map(|entry| {
                entry.last_access = Instant::now();
                entry.table.clone()
            })
        };

        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Insert or replace the table for `dataset_id`.
    ///
    /// Replacing an existing id never evicts another entry.
    pub fn put(&self, dataset_id: &str, table: Table) {
        let entry = CacheEntry {
            table,
            last_access: Instant::now(),
        };
        let evicted = self.entries.lock().push(dataset_id.to_string(), entry);

        // `push` also hands back the old value when the key was present.
        if let Some((evicted_id, _)) = evicted.filter(|(id, _)| id != dataset_id) {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!("Evicted dataset {evicted_id} from table cache");
        }
    }

    /// Whether `dataset_id` is cached. Does not affect recency.
    pub fn contains(&self, dataset_id: &str) -> bool {
        self.entries.lock().contains(dataset_id)
    }

    /// When `dataset_id` was last read or written. Does not affect recency.
    pub fn last_access(&self, dataset_id: &str) -> Option<Instant> {
        self.entries.lock().peek(dataset_id).map(|entry| entry.last_access)
    }

    /// Drop the entry for `dataset_id`, if any.
    pub(crate) fn remove(&self, dataset_id: &str) -> Option<Table> {
        self.entries.lock().pop(dataset_id).map(|entry| entry.table)
    }

    /// Number of cached tables.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of cached tables.
    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    /// Snapshot of the hit, miss and eviction counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use serde_json::{Value, json};

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn table(tag: &str) -> Result<Table, Box<dyn std::error::Error>> {
        let row = match json!({ "timestamp": "2024-01-01", "tag": tag }) {
            Value::Object(map) => map,
            _ => Record::new(),
        };
        Ok(Table::from_records(&[row], &Record::new())?)
    }

    fn cache(capacity: usize) -> Result<TableCache, Box<dyn std::error::Error>> {
        let capacity = NonZeroUsize::new(capacity).ok_or("capacity must be non-zero")?;
        Ok(TableCache::new(capacity))
    }

    #[test]
    fn evicts_least_recently_used() -> TestResult {
        let cache = cache(2)?;
        cache.put("A", table("a")?);
        cache.put("B", table("b")?);
        assert!(cache.get("A").is_some());
        cache.put("C", table("c")?);

        assert!(cache.contains("A"));
        assert!(!cache.contains("B"));
        assert!(cache.contains("C"));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 1);
        Ok(())
    }

    #[test]
    fn replacing_an_entry_does_not_evict() -> TestResult {
        let cache = cache(2)?;
        cache.put("A", table("a1")?);
        cache.put("B", table("b")?);
        cache.put("A", table("a2")?);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.get("A"), Some(table("a2")?));
        Ok(())
    }

    #[test]
    fn contains_does_not_refresh_recency() -> TestResult {
        let cache = cache(2)?;
        cache.put("A", table("a")?);
        cache.put("B", table("b")?);
        assert!(cache.contains("A"));
        cache.put("C", table("c")?);

        assert!(!cache.contains("A"));
        assert!(cache.contains("B"));
        Ok(())
    }

    #[test]
    fn counts_hits_and_misses() -> TestResult {
        let cache = cache(4)?;
        assert!(cache.get("A").is_none());
        cache.put("A", table("a")?);
        assert!(cache.get("A").is_some());
        assert!(cache.get("A").is_some());

        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 2,
                misses: 1,
                evictions: 0
            }
        );
        assert_eq!(cache.capacity(), 4);
        Ok(())
    }

    #[test]
    fn hits_advance_last_access_without_reordering() -> TestResult {
        let cache = cache(2)?;
        assert_eq!(cache.last_access("A"), None);

        cache.put("A", table("a")?);
        cache.put("B", table("b")?);
        let stored = cache.last_access("A").ok_or("A was just stored")?;
        assert!(cache.get("A").is_some());
        let read = cache.last_access("A").ok_or("A is still cached")?;
        assert!(read >= stored);

        // Peeking at the timestamp leaves B as the eviction candidate.
        assert!(cache.last_access("B").is_some());
        cache.put("C", table("c")?);
        assert!(cache.contains("A"));
        assert!(!cache.contains("B"));
        Ok(())
    }

    #[test]
    fn remove_drops_entry() -> TestResult {
        let cache = cache(1)?;
        cache.put("A", table("a")?);
        assert!(cache.remove("A").is_some());
        assert!(cache.is_empty());
        Ok(())
    }
}
