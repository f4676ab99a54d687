//! Sediment - disk-backed tiered unit store
//!
//! Sediment persists opaque, versionable units of server-held state that
//! are too large or numerous to keep fully in memory, while keeping
//! common-case access fast through a chain of in-memory cache tiers.
//!
//! The moving parts, outermost first:
//!
//! - [`facade::StoreStack`] - the composed public surface
//! - [`cache`] - request buffer, session cache, second-level cache, grouping
//! - [`facade::SerializingStore`] - value/byte boundary via a [`unit::Codec`]
//! - [`store::write_behind`] - deferred persistence behind a bounded queue
//! - [`store::disk`] / [`store::file`] - the persistent backends
//! - [`window`] - the circular space allocator behind the blob store
//!
//! Units are keyed by `(context, unit)` where a context is typically a
//! session and a unit a versioned page of state. Reads never hard-fail:
//! a unit that cannot be found, read or decoded surfaces as `None`, which
//! callers treat as expiry.

pub mod cache;
pub mod config;
pub mod error;
pub mod facade;
pub mod logging;
pub mod store;
pub mod types;
pub mod unit;
pub mod window;

pub use config::StoreConfig;
pub use error::{ConfigError, StorageError};
pub use facade::{SerializingStore, StoreStack, StoreStackBuilder};
pub use store::{DataStore, UnitStore};
pub use types::{UnitId, UnitSummary, Window};
pub use unit::{AlwaysBind, Codec, ContextBinder, Payload, StoredUnit};
pub use window::WindowTable;
