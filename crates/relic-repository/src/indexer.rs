//! Keeps the [`Index`](crate::Index) in step with the event log.

use std::sync::Arc;

use tracing::trace;

use relic_agent::{AgentResult, EventHandler};
use relic_types::{Event, Operation};

use crate::error::RepositoryResult;
use crate::repository::Core;

pub(crate) struct Indexer {
    core: Arc<Core>,
}

impl Indexer {
    pub(crate) fn new(core: Arc<Core>) -> Self {
        Self { core }
    }

    fn apply(&self, event: &Event) -> RepositoryResult<()> {
        let content = &event.content;
        if event.operation == Operation::Delete {
            return self.core.index.delete(content);
        }
        // The tree may have moved on since the event; index what is current.
        match self.core.get_tree(content)? {
            Some(tree) if !tree.is_deleted() => {
                let bytes = self.core.read_content(content)?;
                trace!(
                    content = %content.short_hex(),
                    with_bytes = bytes.is_some(),
                    "indexing"
                );
                self.core.index.index(&tree, bytes.as_deref())
            }
            _ => self.core.index.delete(content),
        }
    }
}

impl EventHandler for Indexer {
    fn process(&self, event: &Event) -> AgentResult<()> {
        Ok(self.apply(event)?)
    }
}
