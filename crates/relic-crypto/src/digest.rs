//! Incremental content digest.
//!
//! A [`Digest`] accumulates the BLAKE3 hash and the byte length of a stream.
//! It can be cloned at any point and fed more bytes later, which is how
//! staging sessions resume an upload without re-reading what was already
//! digested. A digest cannot be rewound: to restart from an earlier
//! position the bytes up to that position must be replayed into a fresh
//! digest (see [`Digest::replay`]).

use std::fmt;
use std::io::{self, Read};

use relic_types::Hash;

/// Read buffer size used when replaying a byte source.
const REPLAY_BUFFER_SIZE: usize = 64 * 1024;

/// Running hash and length of a byte stream.
#[derive(Clone)]
pub struct Digest {
    hasher: blake3::Hasher,
    length: u64,
}

impl Digest {
    /// An empty digest (no bytes seen yet).
    pub fn new() -> Self {
        Self {
            hasher: blake3::Hasher::new(),
            length: 0,
        }
    }

    /// Digest of a complete in-memory buffer.
    pub fn of(data: &[u8]) -> Self {
        let mut digest = Self::new();
        digest.update(data);
        digest
    }

    /// Replay up to `limit` bytes of `source` into a fresh digest.
    ///
    /// Stops early if the source runs out of bytes; the resulting
    /// [`length`](Self::length) reports how much was actually consumed.
    pub fn replay<R: Read>(source: R, limit: u64) -> io::Result<Self> {
        let mut digest = Self::new();
        digest.consume(&mut source.take(limit))?;
        Ok(digest)
    }

    /// Feed every remaining byte of `source` into this digest.
    /// Returns the number of bytes consumed.
    pub fn consume<R: Read + ?Sized>(&mut self, source: &mut R) -> io::Result<u64> {
        let mut buf = vec![0u8; REPLAY_BUFFER_SIZE];
        let mut total = 0u64;
        loop {
            let n = match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            self.update(&buf[..n]);
            total += n as u64;
        }
        Ok(total)
    }

    /// Append bytes.
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.length += data.len() as u64;
    }

    /// Hash of every byte seen so far.
    pub fn hash(&self) -> Hash {
        Hash::from_digest(*self.hasher.finalize().as_bytes())
    }

    /// Number of bytes seen so far.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Returns `true` if no byte has been digested.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Returns `true` if the digested bytes hash exactly to `expected`.
    pub fn matches(&self, expected: &Hash) -> bool {
        self.length > 0 && self.hash() == *expected
    }
}

impl Default for Digest {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Digest")
            .field("hash", &self.hash())
            .field("length", &self.length)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_digest() {
        let digest = Digest::new();
        assert!(digest.is_empty());
        assert_eq!(digest.hash(), Hash::of(b""));
        assert!(!digest.matches(&Hash::of(b"")));
    }

    #[test]
    fn incremental_equals_one_shot() {
        let mut digest = Digest::new();
        digest.update(b"hello ");
        digest.update(b"world");
        assert_eq!(digest.hash(), Hash::of(b"hello world"));
        assert_eq!(digest.length(), 11);
        assert!(digest.matches(&Hash::of(b"hello world")));
    }

    #[test]
    fn clone_resumes_independently() {
        let mut first = Digest::of(b"abc");
        let snapshot = first.clone();
        first.update(b"def");
        let mut resumed = snapshot;
        resumed.update(b"xyz");
        assert_eq!(first.hash(), Hash::of(b"abcdef"));
        assert_eq!(resumed.hash(), Hash::of(b"abcxyz"));
    }

    #[test]
    fn replay_respects_limit() {
        let digest = Digest::replay(&b"abcdef"[..], 3).unwrap();
        assert_eq!(digest.length(), 3);
        assert_eq!(digest.hash(), Hash::of(b"abc"));
    }

    #[test]
    fn replay_stops_at_end_of_source() {
        let digest = Digest::replay(&b"ab"[..], 10).unwrap();
        assert_eq!(digest.length(), 2);
        assert_eq!(digest.hash(), Hash::of(b"ab"));
    }

    proptest! {
        #[test]
        fn any_split_yields_same_hash(data in proptest::collection::vec(any::<u8>(), 0..4096), split in 0usize..4096) {
            let split = split.min(data.len());
            let mut digest = Digest::new();
            digest.update(&data[..split]);
            digest.update(&data[split..]);
            prop_assert_eq!(digest.hash(), Hash::of(&data));
            prop_assert_eq!(digest.length(), data.len() as u64);
        }
    }
}
