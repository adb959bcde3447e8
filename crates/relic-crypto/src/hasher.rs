use relic_types::Hash;

/// Domain-separated BLAKE3 hasher.
///
/// Each hasher carries a domain tag that is prepended to every hash
/// computation, so a revision and a raw blob with identical bytes never
/// share a hash.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for metadata revisions.
    pub const REVISION: Self = Self {
        domain: "relic-revision-v1",
    };

    /// Create a hasher with a custom domain tag.
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        Hash::from_digest(*hasher.finalize().as_bytes())
    }

    /// Verify that data produces the expected hash.
    pub fn verify(&self, data: &[u8], expected: &Hash) -> bool {
        self.hash(data) == *expected
    }

    /// The domain tag used by this hasher.
    pub fn domain(&self) -> &str {
        self.domain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let data = b"hello world";
        assert_eq!(
            ContentHasher::REVISION.hash(data),
            ContentHasher::REVISION.hash(data)
        );
    }

    #[test]
    fn domain_separates_from_raw_content() {
        let data = b"same content";
        assert_ne!(ContentHasher::REVISION.hash(data), Hash::of(data));
        assert_ne!(
            ContentHasher::new("other-v1").hash(data),
            ContentHasher::REVISION.hash(data)
        );
    }

    #[test]
    fn verify_detects_tampering() {
        let id = ContentHasher::REVISION.hash(b"original");
        assert!(ContentHasher::REVISION.verify(b"original", &id));
        assert!(!ContentHasher::REVISION.verify(b"tampered", &id));
    }
}
