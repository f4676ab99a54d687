//! Core identity types shared across tiers and backends.

use serde::{Deserialize, Serialize};

/// Identifier of a stored unit within one context.
pub type UnitId = u32;

/// A byte-range allocation inside a context's backing blob.
///
/// Offsets are derived from the position of the window in the allocation
/// sequence; two live windows for the same context never overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub unit_id: UnitId,
    pub offset: u64,
    pub size: u64,
}

/// Listing entry for diagnostics. The type tag is informational only and
/// never participates in identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitSummary {
    pub unit_id: UnitId,
    pub size: u64,
    pub type_tag: Option<String>,
}
