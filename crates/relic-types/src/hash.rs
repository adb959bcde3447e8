use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Length in bytes of every [`Hash`].
pub const HASH_LENGTH: usize = 32;

/// Content-addressed identifier.
///
/// A `Hash` is a BLAKE3 digest. Raw content is identified by the digest of
/// its bytes; metadata revisions by a domain-separated digest of their
/// fields. Hashes are totally ordered so they can key ordered maps and sets.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash([u8; HASH_LENGTH]);

impl Hash {
    /// Digest of raw bytes.
    pub fn of(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Wrap a pre-computed digest.
    pub const fn from_digest(digest: [u8; HASH_LENGTH]) -> Self {
        Self(digest)
    }

    /// The raw 32-byte digest.
    pub fn as_bytes(&self) -> &[u8; HASH_LENGTH] {
        &self.0
    }

    /// Hex-encoded string representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex representation (first 8 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Hex prefix of `len` characters, used to shard on-disk layouts.
    pub fn hex_prefix(&self, len: usize) -> String {
        let mut hex = self.to_hex();
        hex.truncate(len);
        hex
    }

    /// Parse from a hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// Build from a byte slice of exactly [`HASH_LENGTH`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TypeError> {
        if bytes.len() != HASH_LENGTH {
            return Err(TypeError::InvalidLength {
                expected: HASH_LENGTH,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; HASH_LENGTH];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.short_hex())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; HASH_LENGTH]> for Hash {
    fn from(bytes: [u8; HASH_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl From<Hash> for [u8; HASH_LENGTH] {
    fn from(hash: Hash) -> Self {
        hash.0
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn of_is_deterministic() {
        assert_eq!(Hash::of(b"hello world"), Hash::of(b"hello world"));
        assert_ne!(Hash::of(b"hello"), Hash::of(b"world"));
    }

    #[test]
    fn of_matches_plain_blake3() {
        let expected = *blake3::hash(b"abc").as_bytes();
        assert_eq!(Hash::of(b"abc").as_bytes(), &expected);
    }

    #[test]
    fn hex_roundtrip() {
        let hash = Hash::of(b"test");
        let parsed = Hash::from_hex(&hash.to_hex()).unwrap();
        assert_eq!(hash, parsed);
    }

    #[test]
    fn from_hex_rejects_wrong_length() {
        let err = Hash::from_hex("abcd").unwrap_err();
        assert_eq!(
            err,
            TypeError::InvalidLength {
                expected: 32,
                actual: 2
            }
        );
    }

    #[test]
    fn from_hex_rejects_garbage() {
        assert!(matches!(
            Hash::from_hex("not hex at all"),
            Err(TypeError::InvalidHex(_))
        ));
    }

    #[test]
    fn short_hex_and_prefix() {
        let hash = Hash::of(b"test");
        assert_eq!(hash.short_hex().len(), 8);
        assert_eq!(hash.hex_prefix(2), hash.to_hex()[..2]);
        assert_eq!(format!("{hash}").len(), 64);
    }

    #[test]
    fn ordering_is_consistent() {
        let low = Hash::from_digest([0; 32]);
        let high = Hash::from_digest([1; 32]);
        assert!(low < high);
    }

    #[test]
    fn serde_roundtrip() {
        let hash = Hash::of(b"serde test");
        let json = serde_json::to_string(&hash).unwrap();
        let parsed: Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(hash, parsed);
    }
}
