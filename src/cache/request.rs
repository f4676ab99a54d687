//! Request-scoped unit buffer.
//!
//! Units added during a request stay in this buffer until the request ends;
//! nothing is evicted mid-request, so a unit touched twice is the same
//! object both times. `detach` is the persistence point: the binder decides
//! whether the context is durable, and only then do buffered units flow to
//! the inner chain, in the order they were added.

use crate::error::StorageError;
use crate::store::UnitStore;
use crate::types::UnitId;
use crate::unit::{ContextBinder, StoredUnit};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct RequestStore<U> {
    inner: Arc<dyn UnitStore<U>>,
    binder: Arc<dyn ContextBinder>,
    // Insertion-ordered per context; re-adding a unit keeps a single copy
    // but moves it to the end.
    buffers: DashMap<String, Mutex<Vec<StoredUnit<U>>>>,
}

impl<U> RequestStore<U> {
    pub fn new(inner: Arc<dyn UnitStore<U>>, binder: Arc<dyn ContextBinder>) -> Self {
        Self {
            inner,
            binder,
            buffers: DashMap::new(),
        }
    }

    /// Number of units buffered for the context right now.
    pub fn buffered(&self, context_id: &str) -> usize {
        self.buffers
            .get(context_id)
            .map(|b| b.lock().len())
            .unwrap_or(0)
    }
}

impl<U: Send + Sync> UnitStore<U> for RequestStore<U> {
    fn get(&self, context_id: &str, unit_id: UnitId) -> Option<StoredUnit<U>> {
        if let Some(buffer) = self.buffers.get(context_id) {
            let buffer = buffer.lock();
            if let Some(unit) = buffer.iter().find(|u| u.unit_id == unit_id) {
                return Some(unit.clone());
            }
        }
        self.inner.get(context_id, unit_id)
    }

    fn add(&self, context_id: &str, unit: StoredUnit<U>) -> Result<(), StorageError> {
        let buffer = self
            .buffers
            .entry(context_id.to_string())
            .or_insert_with(|| Mutex::new(Vec::new()));
        let mut buffer = buffer.lock();
        buffer.retain(|u| u.unit_id != unit.unit_id);
        buffer.push(unit);
        Ok(())
    }

    fn remove(&self, context_id: &str, unit_id: UnitId) {
        if let Some(buffer) = self.buffers.get(context_id) {
            buffer.lock().retain(|u| u.unit_id != unit_id);
        }
        self.inner.remove(context_id, unit_id);
    }

    fn remove_all(&self, context_id: &str) {
        self.buffers.remove(context_id);
        self.inner.remove_all(context_id);
    }

    fn detach(&self, context_id: &str) {
        if let Some((_, buffer)) = self.buffers.remove(context_id) {
            let units = buffer.into_inner();
            if !units.is_empty() {
                if self.binder.bind(context_id) {
                    for unit in units {
                        let unit_id = unit.unit_id;
                        if let Err(e) = self.inner.add(context_id, unit) {
                            warn!(
                                context_id = %context_id,
                                unit_id,
                                error = %e,
                                "Could not persist buffered unit at end of request"
                            );
                        }
                    }
                } else {
                    debug!(
                        context_id = %context_id,
                        dropped = units.len(),
                        "Context not bound, dropping buffered units"
                    );
                }
            }
        }
        self.inner.detach(context_id);
    }

    fn destroy(&self) {
        self.buffers.clear();
        self.inner.destroy();
    }
}
