//! In-memory cache tiers in front of the persistent chain.
//!
//! Each tier implements [`UnitStore`](crate::store::UnitStore) around an
//! inner store and adds exactly one policy: request-scoped buffering,
//! session-scoped bounding, process-wide recency, or group-wise expiry.
//! Tiers are caches, not stores of record — an entry vanishing from any of
//! them is eviction, never corruption — with one exception: the request
//! buffer is authoritative until `detach`, which is where its units first
//! reach the inner chain.

pub mod grouping;
pub mod request;
pub mod second_level;
pub mod session;
