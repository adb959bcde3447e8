//! Optimistic-concurrency store of revision trees.
//!
//! One row per content hash holds the serialized [`RevisionTree`]. Updates
//! read that row with [`LockMode::ReadModifyWrite`] so that the head check
//! and the write happen atomically with respect to concurrent writers of
//! the same content.

use std::collections::BTreeSet;

use tracing::debug;

use relic_dag::{Revision, RevisionBuilder, RevisionTree};
use relic_store::codec::{decode, encode};
use relic_store::{LockMode, Transaction};
use relic_types::{CommandResult, Hash, Operation};

use crate::error::{LedgerError, LedgerResult};

#[derive(Clone, Copy, Debug)]
pub struct RevisionManager {
    table: &'static str,
}

impl RevisionManager {
    pub const DEFAULT_TABLE: &'static str = "revisions";

    pub fn new() -> Self {
        Self {
            table: Self::DEFAULT_TABLE,
        }
    }

    // ---------------------------------------------------------------
    // Mutations
    // ---------------------------------------------------------------

    /// Add a revision whose parents must be the current head.
    ///
    /// A revision for unknown content must be a root. Re-adding a known
    /// revision is a no-op. After adding, the tree is merged.
    pub fn put(&self, txn: &mut dyn Transaction, revision: Revision) -> LedgerResult<CommandResult> {
        verify(&revision)?;
        let content = revision.content();
        match self.load(txn, &content, LockMode::ReadModifyWrite)? {
            None => {
                if !revision.is_root() {
                    return Err(LedgerError::Conflict {
                        content,
                        reason: "first revision of a content must have no parents".into(),
                    });
                }
                self.save(txn, None, RevisionTree::from_revision(revision))
            }
            Some(current) => {
                if current.contains(&revision.revision()) {
                    return Ok(CommandResult::NoOp);
                }
                if revision.parents() != current.head() {
                    return Err(LedgerError::Conflict {
                        content,
                        reason: "parents differ from current head".into(),
                    });
                }
                let updated = current.add(revision)?.merge();
                self.save(txn, Some(&current), updated)
            }
        }
    }

    /// Ingest an externally produced tree, merging it into the stored one.
    ///
    /// There is no head precondition: this is the replication path. Every
    /// incoming revision must match its own hash, which also rules out
    /// parent cycles.
    pub fn put_tree(&self, txn: &mut dyn Transaction, tree: RevisionTree) -> LedgerResult<CommandResult> {
        for revision in tree.revisions() {
            verify(revision)?;
        }
        let content = tree.content();
        match self.load(txn, &content, LockMode::ReadModifyWrite)? {
            None => self.save(txn, None, tree),
            Some(current) => {
                let updated = current.add_tree(&tree)?.merge();
                self.save(txn, Some(&current), updated)
            }
        }
    }

    /// Mark content as deleted, provided `expected_head` is the current head.
    pub fn delete(
        &self,
        txn: &mut dyn Transaction,
        content: &Hash,
        expected_head: &BTreeSet<Hash>,
    ) -> LedgerResult<CommandResult> {
        let current = self
            .load(txn, content, LockMode::ReadModifyWrite)?
            .ok_or(LedgerError::UnknownContent(*content))?;
        if current.head() != expected_head {
            return Err(LedgerError::Conflict {
                content: *content,
                reason: "expected head differs from current head".into(),
            });
        }
        if current.is_deleted() {
            return Ok(CommandResult::NoOp);
        }
        let tombstone = RevisionBuilder::new()
            .with_parents(current.head().iter().copied())
            .with_deleted(true)
            .build(current.content(), current.length());
        let updated = current.add(tombstone)?;
        self.save(txn, Some(&current), updated)
    }

    /// Persist `after` and classify the change relative to `before`.
    fn save(
        &self,
        txn: &mut dyn Transaction,
        before: Option<&RevisionTree>,
        after: RevisionTree,
    ) -> LedgerResult<CommandResult> {
        let content = after.content();
        if !after.unknown_parents().is_empty() {
            return Err(LedgerError::UnknownRevision {
                content,
                missing: after.unknown_parents().clone(),
            });
        }

        let operation = match before {
            None if after.is_deleted() => Some(Operation::Update),
            None => Some(Operation::Create),
            Some(b) if b.head() == after.head() => None,
            Some(b) => Some(match (b.is_deleted(), after.is_deleted()) {
                (true, false) => Operation::Create,
                (false, true) => Operation::Delete,
                _ => Operation::Update,
            }),
        };

        if before.map_or(true, |b| b.len() != after.len()) {
            txn.put(self.table, content.as_bytes(), encode(&after)?)?;
        }

        let Some(operation) = operation else {
            return Ok(CommandResult::NoOp);
        };
        debug!(
            content = %content.short_hex(),
            %operation,
            head = after.head().len(),
            revisions = after.len(),
            "saved revision tree"
        );
        Ok(CommandResult::applied(operation, content, after.head().clone()))
    }

    // ---------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------

    fn load(
        &self,
        txn: &mut dyn Transaction,
        content: &Hash,
        mode: LockMode,
    ) -> LedgerResult<Option<RevisionTree>> {
        match txn.get(self.table, content.as_bytes(), mode)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// The tree of `content`, if any revision is known.
    pub fn get(&self, txn: &mut dyn Transaction, content: &Hash) -> LedgerResult<Option<RevisionTree>> {
        self.load(txn, content, LockMode::Default)
    }

    /// The tree of `content`, failing with `UnknownContent` if absent.
    pub fn tree(&self, txn: &mut dyn Transaction, content: &Hash) -> LedgerResult<RevisionTree> {
        self.get(txn, content)?
            .ok_or(LedgerError::UnknownContent(*content))
    }

    pub fn head(&self, txn: &mut dyn Transaction, content: &Hash) -> LedgerResult<BTreeSet<Hash>> {
        Ok(self.tree(txn, content)?.head().clone())
    }

    /// The requested revisions of `content`.
    pub fn revisions(
        &self,
        txn: &mut dyn Transaction,
        content: &Hash,
        revisions: &[Hash],
    ) -> LedgerResult<Vec<Revision>> {
        Ok(self.tree(txn, content)?.get_all(revisions)?)
    }
}

fn verify(revision: &Revision) -> LedgerResult<()> {
    if revision.verify() {
        return Ok(());
    }
    Err(LedgerError::ForgedRevision {
        content: revision.content(),
        revision: revision.revision(),
    })
}

impl Default for RevisionManager {
    fn default() -> Self {
        Self::new()
    }
}
