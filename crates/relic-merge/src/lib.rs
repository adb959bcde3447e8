//! Merge engine for relic metadata.
//!
//! Implements metadata diffing and three-way merge with conflict detection.
//! Callers (the revision tree) pick the merge base; this crate only
//! reconciles two divergent metadata maps against it.

pub mod diff;
pub mod three_way;

pub use diff::{apply, diff, MetadataDiff};
pub use three_way::{merge_diffs, three_way_merge, MergeConflict};
