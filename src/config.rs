//! Store configuration.
//!
//! Bounds are validated at construction time: misconfigured caps are a
//! `ConfigError`, while an individual oversized unit at runtime is accepted
//! and evicted by the capped tier it lands in. A cap of zero in the tier
//! fields means "disabled", never "reject everything", which is why zero is
//! legal for tier caps but not for the blob cap or the queue.

use crate::error::ConfigError;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the persistent backends and the tier chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root directory for persisted blobs, unit files and index files.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Per-context blob cap for the single-blob store, in bytes. Space is
    /// reused circularly once a context reaches this size.
    #[serde(default = "default_max_blob_size")]
    pub max_blob_size: u64,

    /// Per-context byte cap for the one-file-per-unit store. Must be at
    /// least `max_blob_size`; 0 disables the cap.
    #[serde(default = "default_max_context_size")]
    pub max_context_size: u64,

    /// Write-behind queue capacity, in pending entries.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How long a save waits for queue space before falling back to a
    /// synchronous write, in milliseconds.
    #[serde(default = "default_offer_timeout_ms")]
    pub offer_timeout_ms: u64,

    /// How long the consumer blocks waiting for work before re-checking
    /// shutdown, in milliseconds.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Session cache unit-count cap per context; 0 disables.
    #[serde(default = "default_session_max_units")]
    pub session_max_units: usize,

    /// Session cache encoded-byte cap per context; 0 disables. A non-zero
    /// cap restricts the session tier to encoded payloads.
    #[serde(default)]
    pub session_max_bytes: u64,

    /// Process-wide second-level cache capacity, in entries; 0 disables.
    #[serde(default = "default_second_level_entries")]
    pub second_level_entries: usize,

    /// Live unit groups per context before the oldest group is expired
    /// wholesale; 0 disables group expiry.
    #[serde(default)]
    pub max_groups: usize,

    /// When set, a unit keeps its first group assignment on re-add.
    #[serde(default)]
    pub stable_groups: bool,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_root() -> PathBuf {
    PathBuf::from("./data/sediment")
}

fn default_max_blob_size() -> u64 {
    10 * 1024 * 1024 // 10 MiB
}

fn default_max_context_size() -> u64 {
    100 * 1024 * 1024 // 100 MiB
}

fn default_queue_capacity() -> usize {
    100
}

fn default_offer_timeout_ms() -> u64 {
    30
}

fn default_poll_timeout_ms() -> u64 {
    1_000
}

fn default_session_max_units() -> usize {
    40
}

fn default_second_level_entries() -> usize {
    256
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            max_blob_size: default_max_blob_size(),
            max_context_size: default_max_context_size(),
            queue_capacity: default_queue_capacity(),
            offer_timeout_ms: default_offer_timeout_ms(),
            poll_timeout_ms: default_poll_timeout_ms(),
            session_max_units: default_session_max_units(),
            session_max_bytes: 0,
            second_level_entries: default_second_level_entries(),
            max_groups: 0,
            stable_groups: false,
            logging: LoggingConfig::default(),
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_blob_size == 0 {
            return Err(ConfigError::InvalidBound(
                "max_blob_size must be greater than zero".to_string(),
            ));
        }
        if self.max_context_size > 0 && self.max_context_size < self.max_blob_size {
            return Err(ConfigError::InvalidBound(format!(
                "max_context_size ({}) must be at least max_blob_size ({})",
                self.max_context_size, self.max_blob_size
            )));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidBound(
                "queue_capacity must be greater than zero".to_string(),
            ));
        }
        if self.offer_timeout_ms == 0 || self.poll_timeout_ms == 0 {
            return Err(ConfigError::InvalidBound(
                "queue timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn offer_timeout(&self) -> Duration {
        Duration::from_millis(self.offer_timeout_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}
