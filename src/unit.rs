//! Unit payloads and external collaborators.
//!
//! A unit reaches the store either as a live value (`Raw`) or as its encoded
//! byte form (`Encoded`). The variant is decided once at the facade boundary;
//! downstream tiers pattern-match on it instead of type-checking. Payload
//! bytes are shared (`Arc`) and never mutated in place: replacement is always
//! "allocate new, invalidate old".

use crate::error::StorageError;
use crate::types::UnitId;
use std::fmt;
use std::sync::Arc;

/// The two forms a unit can take inside the tier chain.
pub enum Payload<U> {
    /// Live value, not yet serialized. Its byte size is unknowable.
    Raw(Arc<U>),
    /// Serialized form, plus an optional type tag for diagnostics/listing.
    Encoded {
        bytes: Arc<[u8]>,
        type_tag: Option<Arc<str>>,
    },
}

impl<U> Payload<U> {
    pub fn is_encoded(&self) -> bool {
        matches!(self, Payload::Encoded { .. })
    }

    /// Byte size of the encoded form, or `None` for raw payloads.
    pub fn encoded_size(&self) -> Option<u64> {
        match self {
            Payload::Raw(_) => None,
            Payload::Encoded { bytes, .. } => Some(bytes.len() as u64),
        }
    }
}

// Manual impl: payloads are shared through `Arc`, so cloning never needs
// `U: Clone`.
impl<U> Clone for Payload<U> {
    fn clone(&self) -> Self {
        match self {
            Payload::Raw(unit) => Payload::Raw(Arc::clone(unit)),
            Payload::Encoded { bytes, type_tag } => Payload::Encoded {
                bytes: Arc::clone(bytes),
                type_tag: type_tag.clone(),
            },
        }
    }
}

impl<U> fmt::Debug for Payload<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Raw(_) => f.write_str("Payload::Raw"),
            Payload::Encoded { bytes, type_tag } => f
                .debug_struct("Payload::Encoded")
                .field("len", &bytes.len())
                .field("type_tag", type_tag)
                .finish(),
        }
    }
}

/// A unit as it travels through the tier chain.
#[derive(Debug)]
pub struct StoredUnit<U> {
    pub unit_id: UnitId,
    pub payload: Payload<U>,
}

impl<U> Clone for StoredUnit<U> {
    fn clone(&self) -> Self {
        Self {
            unit_id: self.unit_id,
            payload: self.payload.clone(),
        }
    }
}

impl<U> StoredUnit<U> {
    pub fn raw(unit_id: UnitId, unit: Arc<U>) -> Self {
        Self {
            unit_id,
            payload: Payload::Raw(unit),
        }
    }

    pub fn encoded(unit_id: UnitId, bytes: Arc<[u8]>, type_tag: Option<Arc<str>>) -> Self {
        Self {
            unit_id,
            payload: Payload::Encoded { bytes, type_tag },
        }
    }
}

/// Opaque serialization collaborator.
///
/// The store never interprets unit bytes; it only moves them. An encoding
/// failure is reported through the `Result` and the unit is simply not
/// persisted — it must not escape the store boundary as a panic.
pub trait Codec<U>: Send + Sync {
    fn encode(&self, unit: &U) -> Result<Vec<u8>, StorageError>;
    fn decode(&self, bytes: &[u8]) -> Result<U, StorageError>;

    /// Diagnostic type tag for listings. Optional.
    fn type_tag(&self, _unit: &U) -> Option<String> {
        None
    }
}

/// Binds a durable context identifier lazily.
///
/// Consulted only when a tier needs to persist past the request. Returning
/// `false` declares the context transient: its buffered units are dropped at
/// the end of the request instead of being persisted.
pub trait ContextBinder: Send + Sync {
    fn bind(&self, context_id: &str) -> bool;
}

/// Binder that declares every context durable.
pub struct AlwaysBind;

impl ContextBinder for AlwaysBind {
    fn bind(&self, _context_id: &str) -> bool {
        true
    }
}
