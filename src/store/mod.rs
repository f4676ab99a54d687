//! Store contracts and backend implementations.
//!
//! Two layers of contract live here. [`DataStore`] is the persistent-store
//! shape: it moves opaque byte payloads for `(context, unit)` keys and knows
//! nothing about the in-memory unit type. [`UnitStore`] is the tier contract
//! shared by every cache layer and the facade: each tier wraps an inner
//! store, applies its own eviction policy, and passes through whatever it
//! cannot fully satisfy.

pub mod disk;
pub mod file;
pub mod write_behind;

use crate::error::StorageError;
use crate::types::{UnitId, UnitSummary};
use crate::unit::StoredUnit;

/// Persistent store for encoded unit payloads.
///
/// Read failures (missing file, truncated region, locked file) degrade to
/// `None`: a missing unit must surface as "expired" to the caller, never as
/// a crash. Write failures are reported so the caller (or the write-behind
/// consumer) can decide whether to propagate or log them.
pub trait DataStore: Send + Sync {
    fn save(
        &self,
        context_id: &str,
        unit_id: UnitId,
        data: &[u8],
        type_tag: Option<&str>,
    ) -> Result<(), StorageError>;

    fn load(&self, context_id: &str, unit_id: UnitId) -> Option<Vec<u8>>;

    fn remove(&self, context_id: &str, unit_id: UnitId);

    /// Removes every unit belonging to `context_id`, including its on-disk
    /// files and directories.
    fn remove_context(&self, context_id: &str);

    /// Lists stored units for diagnostics. Size and type tag are hints.
    fn list(&self, context_id: &str) -> Vec<UnitSummary>;

    /// Summed stored size for the context, in bytes.
    fn total_size(&self, context_id: &str) -> u64;

    /// Flushes in-memory index state to its durable index file. Idempotent.
    fn destroy(&self);

    /// Whether writes to this store may be deferred through a write-behind
    /// queue. Stores that need caller-thread context refuse.
    fn can_defer(&self) -> bool {
        true
    }
}

/// One tier of the cache stack.
///
/// Every mutating call is applied to the tier's own index and propagated
/// inward; a tier is a cache in front of the inner store, not a replacement
/// for it. `remove_all` must cascade to every tier and the backend.
pub trait UnitStore<U>: Send + Sync {
    fn get(&self, context_id: &str, unit_id: UnitId) -> Option<StoredUnit<U>>;

    fn add(&self, context_id: &str, unit: StoredUnit<U>) -> Result<(), StorageError>;

    fn remove(&self, context_id: &str, unit_id: UnitId);

    fn remove_all(&self, context_id: &str);

    /// End-of-request hook. Tiers holding request-scoped state flush or drop
    /// it here; others pass through.
    fn detach(&self, context_id: &str);

    /// Shuts the tier down, cascading to the inner store. Idempotent.
    fn destroy(&self);
}
