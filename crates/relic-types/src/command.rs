use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::hash::Hash;

/// Kind of change a mutation applied to a content's revision tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Content went from absent (or deleted) to live.
    Create,
    /// Live content changed its head.
    Update,
    /// Live content became deleted.
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        };
        write!(f, "{s}")
    }
}

/// Outcome of a mutating call.
///
/// Only [`CommandResult::Applied`] results are persisted as events and
/// signalled to agents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandResult {
    NoOp,
    Applied {
        operation: Operation,
        content: Hash,
        head: BTreeSet<Hash>,
    },
}

impl CommandResult {
    pub fn applied(operation: Operation, content: Hash, head: BTreeSet<Hash>) -> Self {
        Self::Applied {
            operation,
            content,
            head,
        }
    }

    pub fn is_no_op(&self) -> bool {
        matches!(self, Self::NoOp)
    }

    pub fn operation(&self) -> Option<Operation> {
        match self {
            Self::NoOp => None,
            Self::Applied { operation, .. } => Some(*operation),
        }
    }
}
