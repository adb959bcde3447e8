//! Cryptographic primitives for relic.
//!
//! Provides an incremental, resumable-by-replay content [`Digest`] and the
//! domain-separated [`ContentHasher`] used to derive revision hashes.
//!
//! All crypto operations wrap BLAKE3.

pub mod digest;
pub mod hasher;

pub use digest::Digest;
pub use hasher::ContentHasher;
