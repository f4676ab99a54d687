//! Store facade: the serializing bridge and the composed tier chain.
//!
//! [`SerializingStore`] is where units stop being values and become bytes:
//! it encodes `Raw` payloads through the [`Codec`], hands bytes to a
//! [`DataStore`], and decodes on the way back. Everything below it speaks
//! bytes only, which is what makes the write-behind queue safe — encoding
//! happens on the caller's thread, never on the consumer.
//!
//! [`StoreStack`] wires the tiers into one delegation chain by explicit
//! construction; collaborators are injected, nothing is looked up globally.
//! When a byte-capped tier is part of the chain, the facade encodes on
//! `add` instead, so every tier below sees sized payloads.

use crate::cache::grouping::{GroupingStore, UnitGrouper};
use crate::cache::request::RequestStore;
use crate::cache::second_level::SecondLevelStore;
use crate::cache::session::SessionStore;
use crate::config::StoreConfig;
use crate::error::StorageError;
use crate::store::write_behind::WriteBehindStore;
use crate::store::{DataStore, UnitStore};
use crate::types::{UnitId, UnitSummary};
use crate::unit::{AlwaysBind, Codec, ContextBinder, Payload, StoredUnit};
use std::sync::Arc;
use tracing::{debug, warn};

/// Bridge tier between unit payloads and the byte-level persistent chain.
pub struct SerializingStore<U> {
    backend: Arc<dyn DataStore>,
    codec: Arc<dyn Codec<U>>,
}

impl<U> SerializingStore<U> {
    pub fn new(backend: Arc<dyn DataStore>, codec: Arc<dyn Codec<U>>) -> Self {
        Self { backend, codec }
    }
}

impl<U: Send + Sync> UnitStore<U> for SerializingStore<U> {
    fn get(&self, context_id: &str, unit_id: UnitId) -> Option<StoredUnit<U>> {
        let bytes = self.backend.load(context_id, unit_id)?;
        match self.codec.decode(&bytes) {
            Ok(unit) => Some(StoredUnit::raw(unit_id, Arc::new(unit))),
            Err(e) => {
                // A unit that cannot be decoded is as good as expired.
                warn!(
                    context_id = %context_id,
                    unit_id,
                    error = %e,
                    "Could not decode stored unit"
                );
                None
            }
        }
    }

    fn add(&self, context_id: &str, unit: StoredUnit<U>) -> Result<(), StorageError> {
        match &unit.payload {
            Payload::Raw(value) => {
                let bytes = match self.codec.encode(value) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        // Encoding failures stop the unit here; they must
                        // not escape the store boundary.
                        warn!(
                            context_id = %context_id,
                            unit_id = unit.unit_id,
                            error = %e,
                            "Could not encode unit, not persisting"
                        );
                        return Ok(());
                    }
                };
                let tag = self.codec.type_tag(value);
                self.backend
                    .save(context_id, unit.unit_id, &bytes, tag.as_deref())
            }
            Payload::Encoded { bytes, type_tag } => self.backend.save(
                context_id,
                unit.unit_id,
                bytes,
                type_tag.as_deref(),
            ),
        }
    }

    fn remove(&self, context_id: &str, unit_id: UnitId) {
        self.backend.remove(context_id, unit_id);
    }

    fn remove_all(&self, context_id: &str) {
        self.backend.remove_context(context_id);
    }

    fn detach(&self, _context_id: &str) {}

    fn destroy(&self) {
        self.backend.destroy();
    }
}

/// Builder for a [`StoreStack`]. Tiers default to off; enable what the
/// deployment needs, or start from a [`StoreConfig`].
pub struct StoreStackBuilder<U> {
    backend: Arc<dyn DataStore>,
    codec: Arc<dyn Codec<U>>,
    binder: Arc<dyn ContextBinder>,
    write_behind: Option<(usize, std::time::Duration, std::time::Duration)>,
    session: Option<(usize, u64)>,
    second_level: usize,
    grouping: Option<(Arc<dyn UnitGrouper<U>>, usize, bool)>,
}

impl<U: Send + Sync + 'static> StoreStackBuilder<U> {
    pub fn new(backend: Arc<dyn DataStore>, codec: Arc<dyn Codec<U>>) -> Self {
        Self {
            backend,
            codec,
            binder: Arc::new(AlwaysBind),
            write_behind: None,
            session: None,
            second_level: 0,
            grouping: None,
        }
    }

    /// Applies the tier and queue settings of `config`. The backend itself
    /// is constructed by the caller (it may be either store flavor).
    pub fn from_config(
        backend: Arc<dyn DataStore>,
        codec: Arc<dyn Codec<U>>,
        config: &StoreConfig,
    ) -> Self {
        let mut builder = Self::new(backend, codec).write_behind(
            config.queue_capacity,
            config.offer_timeout(),
            config.poll_timeout(),
        );
        if config.session_max_units > 0 || config.session_max_bytes > 0 {
            builder = builder.session(config.session_max_units, config.session_max_bytes);
        }
        builder.second_level = config.second_level_entries;
        builder
    }

    /// Like [`from_config`](Self::from_config), with a grouping tier driven
    /// by `config.max_groups` and `config.stable_groups`.
    pub fn from_config_with_grouper(
        backend: Arc<dyn DataStore>,
        codec: Arc<dyn Codec<U>>,
        config: &StoreConfig,
        grouper: Arc<dyn UnitGrouper<U>>,
    ) -> Self {
        Self::from_config(backend, codec, config).grouping(
            grouper,
            config.max_groups,
            config.stable_groups,
        )
    }

    pub fn binder(mut self, binder: Arc<dyn ContextBinder>) -> Self {
        self.binder = binder;
        self
    }

    pub fn write_behind(
        mut self,
        capacity: usize,
        offer_timeout: std::time::Duration,
        poll_timeout: std::time::Duration,
    ) -> Self {
        self.write_behind = Some((capacity, offer_timeout, poll_timeout));
        self
    }

    pub fn session(mut self, max_units: usize, max_bytes: u64) -> Self {
        self.session = Some((max_units, max_bytes));
        self
    }

    pub fn second_level(mut self, max_entries: usize) -> Self {
        self.second_level = max_entries;
        self
    }

    pub fn grouping(
        mut self,
        grouper: Arc<dyn UnitGrouper<U>>,
        max_groups: usize,
        stable_groups: bool,
    ) -> Self {
        self.grouping = Some((grouper, max_groups, stable_groups));
        self
    }

    pub fn build(self) -> StoreStack<U> {
        // A byte-capped session tier can only hold encoded payloads, so the
        // facade must settle the payload form before the chain sees it.
        let encode_at_boundary = self.session.map(|(_, bytes)| bytes > 0).unwrap_or(false);
        let backend: Arc<dyn DataStore> = match self.write_behind {
            Some((capacity, offer, poll)) => Arc::new(WriteBehindStore::new(
                Arc::clone(&self.backend),
                capacity,
                offer,
                poll,
            )),
            None => Arc::clone(&self.backend),
        };

        let mut chain: Arc<dyn UnitStore<U>> = Arc::new(SerializingStore::new(
            Arc::clone(&backend),
            Arc::clone(&self.codec),
        ));
        if self.second_level > 0 {
            chain = Arc::new(SecondLevelStore::new(chain, self.second_level));
        }
        if let Some((grouper, max_groups, stable)) = self.grouping {
            chain = Arc::new(GroupingStore::new(chain, grouper, max_groups, stable));
        }
        if let Some((max_units, max_bytes)) = self.session {
            chain = Arc::new(SessionStore::new(chain, max_units, max_bytes));
        }
        let chain: Arc<dyn UnitStore<U>> =
            Arc::new(RequestStore::new(chain, Arc::clone(&self.binder)));

        StoreStack {
            chain,
            backend,
            codec: self.codec,
            encode_at_boundary,
        }
    }
}

/// The composed store: request buffer down to the persistent backend.
///
/// "Not found" and "evicted" are indistinguishable on purpose: callers must
/// treat a `None` as an expired unit either way.
pub struct StoreStack<U> {
    chain: Arc<dyn UnitStore<U>>,
    backend: Arc<dyn DataStore>,
    codec: Arc<dyn Codec<U>>,
    /// Encode units on `add` instead of letting them travel as `Raw`. Set
    /// whenever a tier in the chain can only account for encoded bytes.
    encode_at_boundary: bool,
}

impl<U: Send + Sync + 'static> StoreStack<U> {
    pub fn builder(
        backend: Arc<dyn DataStore>,
        codec: Arc<dyn Codec<U>>,
    ) -> StoreStackBuilder<U> {
        StoreStackBuilder::new(backend, codec)
    }

    pub fn get(&self, context_id: &str, unit_id: UnitId) -> Option<Arc<U>> {
        let unit = self.chain.get(context_id, unit_id)?;
        match unit.payload {
            Payload::Raw(value) => Some(value),
            // A tier may hand back the encoded form it cached; decode here.
            Payload::Encoded { bytes, .. } => match self.codec.decode(&bytes) {
                Ok(value) => Some(Arc::new(value)),
                Err(e) => {
                    warn!(
                        context_id = %context_id,
                        unit_id,
                        error = %e,
                        "Could not decode cached unit"
                    );
                    None
                }
            },
        }
    }

    pub fn add(&self, context_id: &str, unit_id: UnitId, unit: Arc<U>) -> Result<(), StorageError> {
        let stored = if self.encode_at_boundary {
            let bytes = match self.codec.encode(unit.as_ref()) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(
                        context_id = %context_id,
                        unit_id,
                        error = %e,
                        "Could not encode unit, not storing"
                    );
                    return Ok(());
                }
            };
            let tag = self.codec.type_tag(unit.as_ref()).map(Arc::from);
            StoredUnit::encoded(unit_id, bytes.into(), tag)
        } else {
            StoredUnit::raw(unit_id, unit)
        };
        self.chain.add(context_id, stored)
    }

    pub fn remove(&self, context_id: &str, unit_id: UnitId) {
        self.chain.remove(context_id, unit_id);
    }

    /// Removes every unit of the context from every tier and the backend.
    pub fn remove_all(&self, context_id: &str) {
        debug!(context_id = %context_id, "Removing all units for context");
        self.chain.remove_all(context_id);
    }

    /// End-of-request hook: flushes the request buffer for the context.
    pub fn end_request(&self, context_id: &str) {
        self.chain.detach(context_id);
    }

    /// Stored units for the context as the backend sees them. Diagnostics
    /// only; deferred writes may not be listed yet.
    pub fn list(&self, context_id: &str) -> Vec<UnitSummary> {
        self.backend.list(context_id)
    }

    pub fn total_size(&self, context_id: &str) -> u64 {
        self.backend.total_size(context_id)
    }

    /// Shuts the stack down, flushing deferred writes and index files.
    pub fn destroy(&self) {
        self.chain.destroy();
    }
}
