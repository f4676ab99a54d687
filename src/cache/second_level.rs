//! Process-wide second-level cache.
//!
//! A single fixed-capacity recency map over `(context, unit)` keys, shared
//! by every context. It is the only tier that populates on read: a hit
//! anywhere deeper in the chain is copied here on the way out, so the next
//! read of a recently touched unit skips the persistent path entirely.
//! Entries disappear under the cap or a `trim` call; that is eviction, not
//! loss, because the inner chain still holds the unit.

use crate::error::StorageError;
use crate::store::UnitStore;
use crate::types::UnitId;
use crate::unit::StoredUnit;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

type Key = (String, UnitId);

struct Recency<U> {
    // Oldest first; a touch moves the key to the back.
    order: VecDeque<Key>,
    entries: HashMap<Key, StoredUnit<U>>,
}

impl<U> Recency<U> {
    fn touch(&mut self, key: &Key) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
            self.order.push_back(key.clone());
        }
    }

    fn insert(&mut self, key: Key, unit: StoredUnit<U>) {
        if self.entries.insert(key.clone(), unit).is_some() {
            self.touch(&key);
        } else {
            self.order.push_back(key);
        }
    }

    fn drop_entry(&mut self, key: &Key) {
        if self.entries.remove(key).is_some() {
            if let Some(pos) = self.order.iter().position(|k| k == key) {
                self.order.remove(pos);
            }
        }
    }

    fn shrink_to(&mut self, target: usize) {
        while self.entries.len() > target {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
        }
    }
}

pub struct SecondLevelStore<U> {
    inner: Arc<dyn UnitStore<U>>,
    max_entries: usize,
    recency: Mutex<Recency<U>>,
}

impl<U> SecondLevelStore<U> {
    /// `max_entries` of zero disables caching; everything passes through.
    pub fn new(inner: Arc<dyn UnitStore<U>>, max_entries: usize) -> Self {
        Self {
            inner,
            max_entries,
            recency: Mutex::new(Recency {
                order: VecDeque::new(),
                entries: HashMap::new(),
            }),
        }
    }

    /// Memory-pressure hook: drops oldest entries until at most `target`
    /// remain.
    pub fn trim(&self, target: usize) {
        let mut recency = self.recency.lock();
        let before = recency.entries.len();
        recency.shrink_to(target);
        if before > target {
            debug!(dropped = before - target, target, "Trimmed second-level cache");
        }
    }

    pub fn len(&self) -> usize {
        self.recency.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cache(&self, context_id: &str, unit: &StoredUnit<U>) {
        if self.max_entries == 0 {
            return;
        }
        let mut recency = self.recency.lock();
        recency.insert((context_id.to_string(), unit.unit_id), unit.clone());
        recency.shrink_to(self.max_entries);
    }
}

impl<U: Send + Sync> UnitStore<U> for SecondLevelStore<U> {
    fn get(&self, context_id: &str, unit_id: UnitId) -> Option<StoredUnit<U>> {
        let key = (context_id.to_string(), unit_id);
        {
            let mut recency = self.recency.lock();
            if let Some(unit) = recency.entries.get(&key) {
                let unit = unit.clone();
                recency.touch(&key);
                return Some(unit);
            }
        }
        let unit = self.inner.get(context_id, unit_id)?;
        self.cache(context_id, &unit);
        Some(unit)
    }

    fn add(&self, context_id: &str, unit: StoredUnit<U>) -> Result<(), StorageError> {
        self.cache(context_id, &unit);
        self.inner.add(context_id, unit)
    }

    fn remove(&self, context_id: &str, unit_id: UnitId) {
        self.recency
            .lock()
            .drop_entry(&(context_id.to_string(), unit_id));
        self.inner.remove(context_id, unit_id);
    }

    fn remove_all(&self, context_id: &str) {
        {
            let mut recency = self.recency.lock();
            let doomed: Vec<Key> = recency
                .entries
                .keys()
                .filter(|k| k.0 == context_id)
                .cloned()
                .collect();
            for key in doomed {
                recency.drop_entry(&key);
            }
        }
        self.inner.remove_all(context_id);
    }

    fn detach(&self, context_id: &str) {
        self.inner.detach(context_id);
    }

    fn destroy(&self) {
        {
            let mut recency = self.recency.lock();
            recency.entries.clear();
            recency.order.clear();
        }
        self.inner.destroy();
    }
}
