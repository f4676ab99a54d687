//! Error types for the sediment page store.

use thiserror::Error;

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode unit {unit_id} in context '{context_id}': {reason}")]
    Encoding {
        context_id: String,
        unit_id: u32,
        reason: String,
    },

    #[error("Failed to decode unit {unit_id} in context '{context_id}': {reason}")]
    Decoding {
        context_id: String,
        unit_id: u32,
        reason: String,
    },

    #[error(
        "Unit {unit_id} in context '{context_id}' is not serialized; a byte-capped \
         tier can only hold encoded units. Check the tier chain configuration."
    )]
    Unserialized { context_id: String, unit_id: u32 },

    #[error("Store has been shut down")]
    ShutDown,
}

/// Configuration errors, raised at construction time for invalid bounds
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidBound(String),

    #[error("Invalid log configuration: {0}")]
    Logging(String),
}
