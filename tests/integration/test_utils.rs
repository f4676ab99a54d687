//! Shared helpers for integration tests.

use sediment::{Codec, StorageError};

/// Codec over plain strings: the encoded form is the UTF-8 bytes.
pub struct StringCodec;

impl Codec<String> for StringCodec {
    fn encode(&self, unit: &String) -> Result<Vec<u8>, StorageError> {
        Ok(unit.as_bytes().to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, StorageError> {
        String::from_utf8(bytes.to_vec()).map_err(|e| StorageError::Decoding {
            context_id: String::new(),
            unit_id: 0,
            reason: e.to_string(),
        })
    }

    fn type_tag(&self, _unit: &String) -> Option<String> {
        Some("String".to_string())
    }
}
