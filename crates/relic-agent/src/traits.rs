//! Capabilities an [`Agent`](crate::Agent) is built from.

use relic_types::Event;

use crate::error::AgentResult;

/// An append-only, sequence-numbered log of events.
pub trait EventSource: Send + Sync {
    /// Up to `limit` events with a sequence number strictly greater than
    /// `after`, in ascending order.
    fn fetch(&self, after: u64, limit: usize) -> AgentResult<Vec<Event>>;

    /// Sequence number of the last event in the log, 0 when empty.
    fn last_seq(&self) -> AgentResult<u64>;
}

/// Durable storage of each agent's cursor.
pub trait CursorStore: Send + Sync {
    /// The last processed sequence number for `key`, 0 when never saved.
    fn load(&self, key: &str) -> AgentResult<u64>;

    fn save(&self, key: &str, seq: u64) -> AgentResult<()>;
}

/// The side effect an agent applies for each event.
///
/// `process` may be called again for an event it already applied, so it
/// must be idempotent.
pub trait EventHandler: Send + Sync {
    fn process(&self, event: &Event) -> AgentResult<()>;
}
