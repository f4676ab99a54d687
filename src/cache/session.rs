//! Session-bounded cache tier.
//!
//! Keeps the most recently added units of each context in memory, bounded by
//! a count cap, a byte cap, or both. Eviction is oldest-first. The byte cap
//! only makes sense for encoded payloads: a live (`Raw`) unit has no knowable
//! size, so a byte-capped tier refuses it outright instead of guessing or
//! silently skipping the cache.

use crate::error::StorageError;
use crate::store::UnitStore;
use crate::types::UnitId;
use crate::unit::{Payload, StoredUnit};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

struct ContextCache<U> {
    // Oldest first; re-adding moves a unit to the back.
    units: VecDeque<StoredUnit<U>>,
    bytes: u64,
}

impl<U> ContextCache<U> {
    fn new() -> Self {
        Self {
            units: VecDeque::new(),
            bytes: 0,
        }
    }

    fn drop_unit(&mut self, unit_id: UnitId) {
        if let Some(pos) = self.units.iter().position(|u| u.unit_id == unit_id) {
            if let Some(unit) = self.units.remove(pos) {
                self.bytes -= unit.payload.encoded_size().unwrap_or(0);
            }
        }
    }

    fn push_unit(&mut self, unit: StoredUnit<U>) {
        self.drop_unit(unit.unit_id);
        self.bytes += unit.payload.encoded_size().unwrap_or(0);
        self.units.push_back(unit);
    }
}

pub struct SessionStore<U> {
    inner: Arc<dyn UnitStore<U>>,
    /// Per-context unit count cap; 0 disables.
    max_units: usize,
    /// Per-context encoded-byte cap; 0 disables. A non-zero cap makes `add`
    /// reject `Raw` payloads.
    max_bytes: u64,
    contexts: DashMap<String, Mutex<ContextCache<U>>>,
}

impl<U> SessionStore<U> {
    pub fn new(inner: Arc<dyn UnitStore<U>>, max_units: usize, max_bytes: u64) -> Self {
        Self {
            inner,
            max_units,
            max_bytes,
            contexts: DashMap::new(),
        }
    }

    fn evict(&self, context_id: &str, cache: &mut ContextCache<U>) {
        while (self.max_units > 0 && cache.units.len() > self.max_units)
            || (self.max_bytes > 0 && cache.bytes > self.max_bytes)
        {
            let Some(oldest) = cache.units.pop_front() else {
                break;
            };
            cache.bytes -= oldest.payload.encoded_size().unwrap_or(0);
            debug!(
                context_id = %context_id,
                unit_id = oldest.unit_id,
                "Evicting oldest unit from session cache"
            );
        }
    }

    #[cfg(test)]
    fn cached(&self, context_id: &str) -> usize {
        self.contexts
            .get(context_id)
            .map(|c| c.lock().units.len())
            .unwrap_or(0)
    }
}

impl<U: Send + Sync> UnitStore<U> for SessionStore<U> {
    fn get(&self, context_id: &str, unit_id: UnitId) -> Option<StoredUnit<U>> {
        if let Some(cache) = self.contexts.get(context_id) {
            let cache = cache.lock();
            if let Some(unit) = cache.units.iter().find(|u| u.unit_id == unit_id) {
                return Some(unit.clone());
            }
        }
        self.inner.get(context_id, unit_id)
    }

    fn add(&self, context_id: &str, unit: StoredUnit<U>) -> Result<(), StorageError> {
        if self.max_bytes > 0 && !unit.payload.is_encoded() {
            return Err(StorageError::Unserialized {
                context_id: context_id.to_string(),
                unit_id: unit.unit_id,
            });
        }

        {
            let cache = self
                .contexts
                .entry(context_id.to_string())
                .or_insert_with(|| Mutex::new(ContextCache::new()));
            let mut cache = cache.lock();
            cache.push_unit(unit.clone());
            self.evict(context_id, &mut cache);
        }
        self.inner.add(context_id, unit)
    }

    fn remove(&self, context_id: &str, unit_id: UnitId) {
        if let Some(cache) = self.contexts.get(context_id) {
            cache.lock().drop_unit(unit_id);
        }
        self.inner.remove(context_id, unit_id);
    }

    fn remove_all(&self, context_id: &str) {
        self.contexts.remove(context_id);
        self.inner.remove_all(context_id);
    }

    fn detach(&self, context_id: &str) {
        self.inner.detach(context_id);
    }

    fn destroy(&self) {
        self.contexts.clear();
        self.inner.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::testing::MemoryStore;
    use std::sync::atomic::Ordering;

    fn raw(id: UnitId) -> StoredUnit<String> {
        StoredUnit::raw(id, Arc::new(format!("unit-{id}")))
    }

    fn encoded(id: UnitId, len: usize) -> StoredUnit<String> {
        StoredUnit::encoded(id, vec![0u8; len].into(), None)
    }

    #[test]
    fn test_count_cap_keeps_most_recent() {
        let inner = Arc::new(MemoryStore::new());
        let store = SessionStore::new(inner.clone(), 2, 0);

        for id in 1..=3 {
            store.add("s1", raw(id)).unwrap();
        }

        assert_eq!(store.cached("s1"), 2);
        // Unit 1 is gone from the cache but still reachable through inner.
        assert!(store.get("s1", 1).is_some());
        assert_eq!(inner.gets.load(Ordering::SeqCst), 1);
        // Units 2 and 3 come from the cache.
        store.get("s1", 2);
        store.get("s1", 3);
        assert_eq!(inner.gets.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_byte_cap_rejects_raw_units() {
        let inner = Arc::new(MemoryStore::new());
        let store = SessionStore::new(inner.clone(), 0, 1024);

        let err = store.add("s1", raw(1)).unwrap_err();
        assert!(matches!(err, StorageError::Unserialized { unit_id: 1, .. }));
        assert_eq!(inner.adds.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_byte_cap_evicts_oldest() {
        let inner = Arc::new(MemoryStore::new());
        let store = SessionStore::new(inner.clone(), 0, 10);

        store.add("s1", encoded(1, 4)).unwrap();
        store.add("s1", encoded(2, 4)).unwrap();
        store.add("s1", encoded(3, 4)).unwrap();

        assert_eq!(store.cached("s1"), 2);
    }

    #[test]
    fn test_oversized_unit_accepted_then_evicted() {
        let inner = Arc::new(MemoryStore::new());
        let store = SessionStore::new(inner.clone(), 0, 10);

        store.add("s1", encoded(1, 50)).unwrap();
        assert_eq!(store.cached("s1"), 0);
        // Still persisted inward.
        assert!(inner.contains("s1", 1));
    }

    #[test]
    fn test_readd_refreshes_position() {
        let inner = Arc::new(MemoryStore::new());
        let store = SessionStore::new(inner.clone(), 2, 0);

        store.add("s1", raw(1)).unwrap();
        store.add("s1", raw(2)).unwrap();
        store.add("s1", raw(1)).unwrap();
        store.add("s1", raw(3)).unwrap();

        // 2 was oldest after 1 was refreshed, so 2 is the eviction victim.
        inner.remove_all("s1");
        assert!(store.get("s1", 1).is_some());
        assert!(store.get("s1", 2).is_none());
        assert!(store.get("s1", 3).is_some());
    }

    #[test]
    fn test_remove_all_cascades() {
        let inner = Arc::new(MemoryStore::new());
        let store = SessionStore::new(inner.clone(), 0, 0);

        store.add("s1", raw(1)).unwrap();
        store.add("s2", raw(1)).unwrap();
        store.remove_all("s1");

        assert_eq!(store.cached("s1"), 0);
        assert!(!inner.contains("s1", 1));
        assert!(inner.contains("s2", 1));
    }

    #[test]
    fn test_contexts_are_isolated() {
        let inner = Arc::new(MemoryStore::new());
        let store = SessionStore::new(inner.clone(), 1, 0);

        store.add("s1", raw(1)).unwrap();
        store.add("s2", raw(2)).unwrap();

        assert_eq!(store.cached("s1"), 1);
        assert_eq!(store.cached("s2"), 1);
    }
}
