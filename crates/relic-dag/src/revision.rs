//! Content-addressed metadata revisions.
//!
//! A [`Revision`] records one state of a content's metadata together with
//! the revisions it was derived from. Its hash covers every other field, so
//! two replicas that build the same revision always agree on its identity.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use relic_crypto::ContentHasher;
use relic_types::{encode_metadata, Hash, Metadata, Value};

/// An immutable metadata snapshot of a piece of content.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    content: Hash,
    length: u64,
    revision: Hash,
    parents: BTreeSet<Hash>,
    deleted: bool,
    metadata: Metadata,
}

impl Revision {
    /// Start building a revision.
    pub fn builder() -> RevisionBuilder {
        RevisionBuilder::default()
    }

    /// Hash of the content this revision describes.
    pub fn content(&self) -> Hash {
        self.content
    }

    /// Length of the content in bytes.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Hash identifying this revision.
    pub fn revision(&self) -> Hash {
        self.revision
    }

    pub fn parents(&self) -> &BTreeSet<Hash> {
        &self.parents
    }

    /// Returns `true` if this revision marks the content as deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Returns `true` if this revision has no parents.
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    /// Returns `true` if the stored revision hash matches the fields.
    ///
    /// Revisions received from a peer are built with
    /// [`RevisionBuilder::build_with_revision`] and may carry any hash.
    pub fn verify(&self) -> bool {
        revision_hash(
            &self.content,
            self.length,
            &self.parents,
            self.deleted,
            &self.metadata,
        ) == self.revision
    }

    /// A human-readable one-line summary.
    pub fn summary(&self) -> String {
        format!(
            "{} of {} ({} parents{})",
            self.revision.short_hex(),
            self.content.short_hex(),
            self.parents.len(),
            if self.deleted { ", deleted" } else { "" },
        )
    }
}

/// Builder for [`Revision`].
#[derive(Clone, Debug, Default)]
pub struct RevisionBuilder {
    parents: BTreeSet<Hash>,
    deleted: bool,
    metadata: Metadata,
}

impl RevisionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add parents to the revision being built.
    pub fn with_parents(mut self, parents: impl IntoIterator<Item = Hash>) -> Self {
        self.parents.extend(parents);
        self
    }

    pub fn with_parent(mut self, parent: Hash) -> Self {
        self.parents.insert(parent);
        self
    }

    pub fn with_deleted(mut self, deleted: bool) -> Self {
        self.deleted = deleted;
        self
    }

    /// Replace the whole metadata map.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Set a single metadata entry.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Build the revision, deriving its hash from every other field.
    pub fn build(self, content: Hash, length: u64) -> Revision {
        let revision = revision_hash(
            &content,
            length,
            &self.parents,
            self.deleted,
            &self.metadata,
        );
        self.build_with_revision(content, length, revision)
    }

    /// Build the revision with an externally supplied hash.
    pub fn build_with_revision(self, content: Hash, length: u64, revision: Hash) -> Revision {
        Revision {
            content,
            length,
            revision,
            parents: self.parents,
            deleted: self.deleted,
            metadata: self.metadata,
        }
    }
}

fn revision_hash(
    content: &Hash,
    length: u64,
    parents: &BTreeSet<Hash>,
    deleted: bool,
    metadata: &Metadata,
) -> Hash {
    let mut bytes = Vec::with_capacity(128);
    bytes.extend_from_slice(content.as_bytes());
    bytes.extend_from_slice(&length.to_le_bytes());
    bytes.extend_from_slice(&(parents.len() as u64).to_le_bytes());
    for parent in parents {
        bytes.extend_from_slice(parent.as_bytes());
    }
    bytes.push(u8::from(deleted));
    encode_metadata(metadata, &mut bytes);
    ContentHasher::REVISION.hash(&bytes)
}
