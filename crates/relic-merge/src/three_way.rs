use relic_types::Metadata;
use tracing::trace;

use crate::diff::{apply, diff, MetadataDiff};

/// Two sides of a merge assigned different values to the same key.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("conflicting changes to metadata key {key:?}")]
pub struct MergeConflict {
    pub key: String,
}

/// Union two diffs taken against the same base.
///
/// Both sides agreeing on a key (same new value, or both removing it) is
/// fine; any disagreement is a conflict and is never auto-resolved.
pub fn merge_diffs(left: &MetadataDiff, right: &MetadataDiff) -> Result<MetadataDiff, MergeConflict> {
    let mut merged = left.clone();
    for (key, change) in right {
        match merged.get(key) {
            Some(existing) if existing != change => {
                return Err(MergeConflict { key: key.clone() });
            }
            Some(_) => {}
            None => {
                merged.insert(key.clone(), change.clone());
            }
        }
    }
    Ok(merged)
}

/// Reconcile `left` and `right` against their common `base`.
pub fn three_way_merge(
    base: &Metadata,
    left: &Metadata,
    right: &Metadata,
) -> Result<Metadata, MergeConflict> {
    let left_changes = diff(base, left);
    let right_changes = diff(base, right);
    let merged = merge_diffs(&left_changes, &right_changes)?;
    trace!(
        left = left_changes.len(),
        right = right_changes.len(),
        merged = merged.len(),
        "three-way merge"
    );
    Ok(apply(base, &merged))
}
