use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::command::Operation;
use crate::hash::Hash;

/// An entry of a repository's append-only event log.
///
/// Sequence numbers are strictly increasing within one repository, which
/// gives every agent replaying the log the same order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub operation: Operation,
    pub content: Hash,
    /// Head of the content's revision tree right after the operation.
    pub revisions: BTreeSet<Hash>,
}

impl Event {
    pub fn new(seq: u64, operation: Operation, content: Hash, revisions: BTreeSet<Hash>) -> Self {
        Self {
            seq,
            timestamp: Utc::now(),
            operation,
            content,
            revisions,
        }
    }
}
