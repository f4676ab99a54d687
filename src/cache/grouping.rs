//! Group-wise expiry tier.
//!
//! Pure bookkeeping: units are stored by the inner chain, this tier only
//! tracks which named group each unit belongs to and expires whole groups.
//! With at most `max_groups` live groups per context, adding a unit to a
//! fresh group evicts the oldest group wholesale, removing every one of its
//! units from the inner chain in one sweep. Typical groups are navigation
//! episodes: leave the flow, and everything it stored goes at once.

use crate::error::StorageError;
use crate::store::UnitStore;
use crate::types::UnitId;
use crate::unit::StoredUnit;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// Assigns every added unit to a named group.
pub trait UnitGrouper<U>: Send + Sync {
    fn group_of(&self, context_id: &str, unit: &StoredUnit<U>) -> String;
}

impl<U, F> UnitGrouper<U> for F
where
    F: Fn(&str, &StoredUnit<U>) -> String + Send + Sync,
{
    fn group_of(&self, context_id: &str, unit: &StoredUnit<U>) -> String {
        self(context_id, unit)
    }
}

#[derive(Default)]
struct ContextGroups {
    // Oldest group first; touching a group moves it to the back.
    order: VecDeque<String>,
    members: HashMap<String, Vec<UnitId>>,
    group_of_unit: HashMap<UnitId, String>,
}

impl ContextGroups {
    fn touch(&mut self, group: &str) {
        if let Some(pos) = self.order.iter().position(|g| g == group) {
            self.order.remove(pos);
        }
        self.order.push_back(group.to_string());
    }

    fn drop_unit(&mut self, unit_id: UnitId) {
        if let Some(group) = self.group_of_unit.remove(&unit_id) {
            if let Some(members) = self.members.get_mut(&group) {
                members.retain(|&id| id != unit_id);
                if members.is_empty() {
                    self.members.remove(&group);
                    if let Some(pos) = self.order.iter().position(|g| g == &group) {
                        self.order.remove(pos);
                    }
                }
            }
        }
    }
}

pub struct GroupingStore<U> {
    inner: Arc<dyn UnitStore<U>>,
    grouper: Arc<dyn UnitGrouper<U>>,
    /// Live groups per context; 0 disables group expiry.
    max_groups: usize,
    /// When set, a unit keeps its first group on re-add even if the grouper
    /// now names a different one.
    stable_groups: bool,
    contexts: DashMap<String, Mutex<ContextGroups>>,
}

impl<U> GroupingStore<U> {
    pub fn new(
        inner: Arc<dyn UnitStore<U>>,
        grouper: Arc<dyn UnitGrouper<U>>,
        max_groups: usize,
        stable_groups: bool,
    ) -> Self {
        Self {
            inner,
            grouper,
            max_groups,
            stable_groups,
            contexts: DashMap::new(),
        }
    }

    #[cfg(test)]
    fn group_count(&self, context_id: &str) -> usize {
        self.contexts
            .get(context_id)
            .map(|g| g.lock().members.len())
            .unwrap_or(0)
    }
}

impl<U: Send + Sync> UnitStore<U> for GroupingStore<U> {
    fn get(&self, context_id: &str, unit_id: UnitId) -> Option<StoredUnit<U>> {
        self.inner.get(context_id, unit_id)
    }

    fn add(&self, context_id: &str, unit: StoredUnit<U>) -> Result<(), StorageError> {
        let named = self.grouper.group_of(context_id, &unit);
        let mut expired: Vec<UnitId> = Vec::new();
        {
            let groups = self
                .contexts
                .entry(context_id.to_string())
                .or_insert_with(|| Mutex::new(ContextGroups::default()));
            let mut groups = groups.lock();

            let group = match groups.group_of_unit.get(&unit.unit_id) {
                Some(current) if self.stable_groups => current.clone(),
                _ => named,
            };
            groups.drop_unit(unit.unit_id);
            groups
                .members
                .entry(group.clone())
                .or_default()
                .push(unit.unit_id);
            groups.group_of_unit.insert(unit.unit_id, group.clone());
            groups.touch(&group);

            if self.max_groups > 0 && groups.members.len() > self.max_groups {
                if let Some(oldest) = groups.order.pop_front() {
                    debug!(
                        context_id = %context_id,
                        group = %oldest,
                        "Expiring oldest unit group"
                    );
                    if let Some(members) = groups.members.remove(&oldest) {
                        for id in &members {
                            groups.group_of_unit.remove(id);
                        }
                        expired = members;
                    }
                }
            }
        }
        for id in expired {
            self.inner.remove(context_id, id);
        }
        self.inner.add(context_id, unit)
    }

    fn remove(&self, context_id: &str, unit_id: UnitId) {
        if let Some(groups) = self.contexts.get(context_id) {
            groups.lock().drop_unit(unit_id);
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
