//! The revision tree of one content hash and its merge algorithm.
//!
//! [`RevisionTree`] stores revisions in a map keyed by revision hash. The
//! `head`, `tail` and `unknown_parents` sets are derived from that map every
//! time a tree is constructed; trees are never mutated in place.
//!
//! # Invariants
//!
//! - A tree holds at least one revision.
//! - Every revision shares the tree's content hash and length.
//! - The graph is acyclic: a revision hash covers its parents' hashes.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use relic_merge::{three_way_merge, MergeConflict};
use relic_types::{Hash, Metadata};

use crate::error::{DagError, DagResult};
use crate::revision::{Revision, RevisionBuilder};

/// Immutable DAG of the revisions known for one content hash.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Revision>", into = "Vec<Revision>")]
pub struct RevisionTree {
    content: Hash,
    length: u64,
    nodes: BTreeMap<Hash, Revision>,
    head: BTreeSet<Hash>,
    tail: BTreeSet<Hash>,
    unknown_parents: BTreeSet<Hash>,
}

/// Why a pairwise merge could not complete.
#[derive(Debug)]
enum MergeFailure {
    /// One side is a tombstone, the other is not.
    Deletion,
    Metadata(MergeConflict),
    /// A revision to merge is not in the working set.
    Missing(Hash),
}

impl From<MergeConflict> for MergeFailure {
    fn from(conflict: MergeConflict) -> Self {
        Self::Metadata(conflict)
    }
}

impl RevisionTree {
    /// Build a tree from a non-empty set of revisions of one content.
    pub fn new(revisions: impl IntoIterator<Item = Revision>) -> DagResult<Self> {
        let mut iter = revisions.into_iter();
        let first = iter.next().ok_or(DagError::Empty)?;
        let (content, length) = (first.content(), first.length());

        let mut nodes = BTreeMap::new();
        nodes.insert(first.revision(), first);
        for revision in iter {
            check_content(content, length, &revision)?;
            nodes.insert(revision.revision(), revision);
        }
        Ok(Self::from_nodes(content, length, nodes))
    }

    /// A tree holding a single revision.
    pub fn from_revision(revision: Revision) -> Self {
        let (content, length) = (revision.content(), revision.length());
        let mut nodes = BTreeMap::new();
        nodes.insert(revision.revision(), revision);
        Self::from_nodes(content, length, nodes)
    }

    fn from_nodes(content: Hash, length: u64, nodes: BTreeMap<Hash, Revision>) -> Self {
        let referenced: BTreeSet<Hash> = nodes
            .values()
            .flat_map(|r| r.parents().iter().copied())
            .collect();

        let head = nodes
            .keys()
            .filter(|hash| !referenced.contains(*hash))
            .copied()
            .collect();

        let tail = nodes
            .values()
            .filter(|r| r.parents().iter().all(|p| !nodes.contains_key(p)))
            .map(Revision::revision)
            .collect();

        let unknown_parents = referenced
            .into_iter()
            .filter(|p| !nodes.contains_key(p))
            .collect();

        Self {
            content,
            length,
            nodes,
            head,
            tail,
            unknown_parents,
        }
    }

    // ---------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------

    pub fn content(&self) -> Hash {
        self.content
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    /// Number of revisions in the tree. Never zero.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always `false`: a tree holds at least one revision.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Revisions that are nobody's parent.
    pub fn head(&self) -> &BTreeSet<Hash> {
        &self.head
    }

    /// Revisions with no parent present in the tree.
    pub fn tail(&self) -> &BTreeSet<Hash> {
        &self.tail
    }

    /// Parent hashes referenced by some revision but absent from the tree.
    pub fn unknown_parents(&self) -> &BTreeSet<Hash> {
        &self.unknown_parents
    }

    /// Returns `true` if every head revision is a tombstone.
    pub fn is_deleted(&self) -> bool {
        self.head_revisions().iter().all(|r| r.is_deleted())
    }

    pub fn contains(&self, revision: &Hash) -> bool {
        self.nodes.contains_key(revision)
    }

    /// Look up a revision by hash.
    pub fn get(&self, revision: &Hash) -> DagResult<&Revision> {
        self.nodes.get(revision).ok_or(DagError::NotFound(*revision))
    }

    /// Look up several revisions, failing on the first missing one.
    pub fn get_all<'a>(
        &self,
        revisions: impl IntoIterator<Item = &'a Hash>,
    ) -> DagResult<Vec<Revision>> {
        revisions
            .into_iter()
            .map(|hash| self.get(hash).cloned())
            .collect()
    }

    pub fn head_revisions(&self) -> Vec<&Revision> {
        self.head.iter().filter_map(|h| self.nodes.get(h)).collect()
    }

    /// Iterate over every revision in hash order.
    pub fn revisions(&self) -> impl Iterator<Item = &Revision> {
        self.nodes.values()
    }

    /// Every ancestor of `revision` present in the tree, excluding itself.
    pub fn ancestors(&self, revision: &Hash) -> DagResult<BTreeSet<Hash>> {
        self.get(revision)?;
        let mut ancestors = ancestor_set(&self.nodes, revision);
        ancestors.remove(revision);
        Ok(ancestors.into_iter().collect())
    }

    // ---------------------------------------------------------------
    // Construction
    // ---------------------------------------------------------------

    /// A new tree with `revision` added. Adding a known revision is a no-op.
    pub fn add(&self, revision: Revision) -> DagResult<RevisionTree> {
        check_content(self.content, self.length, &revision)?;
        let mut nodes = self.nodes.clone();
        nodes.entry(revision.revision()).or_insert(revision);
        Ok(Self::from_nodes(self.content, self.length, nodes))
    }

    /// A new tree holding the union of both trees' revisions.
    pub fn add_tree(&self, other: &RevisionTree) -> DagResult<RevisionTree> {
        let mut nodes = self.nodes.clone();
        for revision in other.revisions() {
            check_content(self.content, self.length, revision)?;
            nodes
                .entry(revision.revision())
                .or_insert_with(|| revision.clone());
        }
        Ok(Self::from_nodes(self.content, self.length, nodes))
    }

    // ---------------------------------------------------------------
    // Ordering
    // ---------------------------------------------------------------

    /// Every revision, each one listed before all of its parents.
    ///
    /// Depth-first from the head, emitting present parents before a node,
    /// then reversing the emission order.
    pub fn list(&self) -> Vec<&Revision> {
        let mut visited = HashSet::new();
        let mut emitted = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<(Hash, bool)> = self.head.iter().rev().map(|h| (*h, false)).collect();

        while let Some((hash, expanded)) = stack.pop() {
            if expanded {
                emitted.push(hash);
                continue;
            }
            if !visited.insert(hash) {
                continue;
            }
            stack.push((hash, true));
            if let Some(revision) = self.nodes.get(&hash) {
                for parent in revision.parents().iter().rev() {
                    if self.nodes.contains_key(parent) && !visited.contains(parent) {
                        stack.push((*parent, false));
                    }
                }
            }
        }

        emitted
            .iter()
            .rev()
            .filter_map(|h| self.nodes.get(h))
            .collect()
    }

    // ---------------------------------------------------------------
    // Merge
    // ---------------------------------------------------------------

    /// Reconcile the head into a single revision.
    ///
    /// Heads are folded pairwise with a recursive three-way merge. If any
    /// pair conflicts, the tree is returned unchanged and its head stays
    /// larger than one. On success the tree gains one revision whose parents
    /// are the whole original head.
    pub fn merge(&self) -> RevisionTree {
        if self.head.len() <= 1 {
            return self.clone();
        }

        let heads: Vec<Hash> = self.head.iter().copied().collect();
        let mut work = self.nodes.clone();
        let merged = match merge_all(&mut work, heads[0], &heads[1..]) {
            Ok(merged) => merged,
            Err(failure) => {
                debug!(
                    content = %self.content.short_hex(),
                    heads = heads.len(),
                    ?failure,
                    "merge left head unresolved"
                );
                return self.clone();
            }
        };

        let Some(result) = work.get(&merged) else {
            return self.clone();
        };
        let revision = RevisionBuilder::new()
            .with_parents(self.head.iter().copied())
            .with_deleted(result.is_deleted())
            .with_metadata(result.metadata().clone())
            .build(result.content(), result.length());

        debug!(
            content = %self.content.short_hex(),
            heads = heads.len(),
            revision = %revision.revision().short_hex(),
            "merged head"
        );

        let mut nodes = self.nodes.clone();
        nodes.insert(revision.revision(), revision);
        Self::from_nodes(self.content, self.length, nodes)
    }
}

fn check_content(content: Hash, length: u64, revision: &Revision) -> DagResult<()> {
    if revision.content() != content || revision.length() != length {
        return Err(DagError::ContentMismatch {
            expected: content,
            actual: revision.content(),
        });
    }
    Ok(())
}

/// `start` plus every ancestor reachable through present parents (BFS).
fn ancestor_set(nodes: &BTreeMap<Hash, Revision>, start: &Hash) -> HashSet<Hash> {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    visited.insert(*start);
    queue.push_back(*start);

    while let Some(current) = queue.pop_front() {
        if let Some(revision) = nodes.get(&current) {
            for parent in revision.parents() {
                if nodes.contains_key(parent) && visited.insert(*parent) {
                    queue.push_back(*parent);
                }
            }
        }
    }

    visited
}

/// Common ancestors of `left` and `right` that are not an ancestor of
/// another common ancestor.
fn latest_common_ancestors(
    nodes: &BTreeMap<Hash, Revision>,
    left: &Hash,
    right: &Hash,
) -> BTreeSet<Hash> {
    let left_ancestors = ancestor_set(nodes, left);
    let right_ancestors = ancestor_set(nodes, right);
    let common: BTreeSet<Hash> = left_ancestors
        .intersection(&right_ancestors)
        .copied()
        .collect();

    let mut shadowed = HashSet::new();
    for ancestor in &common {
        let mut above = ancestor_set(nodes, ancestor);
        above.remove(ancestor);
        shadowed.extend(above);
    }

    common
        .into_iter()
        .filter(|h| !shadowed.contains(h))
        .collect()
}

/// Fold `first` and `rest` pairwise into one revision added to `work`.
fn merge_all(
    work: &mut BTreeMap<Hash, Revision>,
    first: Hash,
    rest: &[Hash],
) -> Result<Hash, MergeFailure> {
    rest.iter()
        .try_fold(first, |acc, next| merge_pair(work, acc, *next))
}

/// Merge two revisions into a virtual revision added to `work`.
fn merge_pair(
    work: &mut BTreeMap<Hash, Revision>,
    left: Hash,
    right: Hash,
) -> Result<Hash, MergeFailure> {
    let l = work.get(&left).ok_or(MergeFailure::Missing(left))?;
    let r = work.get(&right).ok_or(MergeFailure::Missing(right))?;
    if l.is_deleted() != r.is_deleted() {
        return Err(MergeFailure::Deletion);
    }
    let (l, r) = (l.clone(), r.clone());

    let metadata = if l.metadata() == r.metadata() {
        l.metadata().clone()
    } else {
        let ancestors: Vec<Hash> = latest_common_ancestors(work, &left, &right)
            .into_iter()
            .collect();
        let base = match ancestors.as_slice() {
            [] => Metadata::new(),
            [single] => work
                .get(single)
                .map(|a| a.metadata().clone())
                .unwrap_or_default(),
            [first, rest @ ..] => {
                let virtual_ancestor = merge_all(work, *first, rest)?;
                work.get(&virtual_ancestor)
                    .map(|a| a.metadata().clone())
                    .unwrap_or_default()
            }
        };
        three_way_merge(&base, l.metadata(), r.metadata())?
    };

    let merged = RevisionBuilder::new()
        .with_parents([left, right])
        .with_deleted(l.is_deleted() && r.is_deleted())
        .with_metadata(metadata)
        .build(l.content(), l.length());
    let hash = merged.revision();
    work.entry(hash).or_insert(merged);
    Ok(hash)
}

impl TryFrom<Vec<Revision>> for RevisionTree {
    type Error = DagError;

    fn try_from(revisions: Vec<Revision>) -> DagResult<Self> {
        Self::new(revisions)
    }
}

impl From<RevisionTree> for Vec<Revision> {
    fn from(tree: RevisionTree) -> Self {
        tree.nodes.into_values().collect()
    }
}

impl RevisionTree {
    /// Serialize the tree's revisions to bincode bytes.
    pub fn to_bytes(&self) -> DagResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| DagError::Serialization(e.to_string()))
    }

    /// Decode a tree, recomputing its derived sets.
    pub fn from_bytes(data: &[u8]) -> DagResult<Self> {
        bincode::deserialize(data).map_err(|e| DagError::Serialization(e.to_string()))
    }
}
