//! Byte encoding of stored values and keys.
//!
//! Values use bincode. Sequence keys are big-endian so that bytewise key
//! order equals numeric order.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{StoreError, StoreResult};

/// Encode a value for storage.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> StoreResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Decode a stored value.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Key of a sequence-numbered row.
pub fn seq_key(seq: u64) -> [u8; 8] {
    seq.to_be_bytes()
}

/// Sequence number of a key produced by [`seq_key`].
pub fn seq_from_key(table: &str, key: &[u8]) -> StoreResult<u64> {
    let bytes: [u8; 8] = key.try_into().map_err(|_| StoreError::MalformedKey {
        table: table.to_string(),
        reason: format!("expected 8 bytes, got {}", key.len()),
    })?;
    Ok(u64::from_be_bytes(bytes))
}
