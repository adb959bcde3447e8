//! Message bus collaborator.
//!
//! The bus carries no guarantees: a posted event may be delivered late,
//! twice or not at all. Agents never depend on it for correctness; it only
//! wakes them sooner.

use std::collections::HashMap;
use std::sync::{RwLock, Weak};

use tracing::trace;

use relic_agent::Agent;
use relic_types::Event;

pub trait MessageBus: Send + Sync {
    /// Announce that `repository` appended `event`. Fire and forget.
    fn post(&self, repository: &str, event: &Event);

    /// Signal `agent` whenever `repository` posts an event. The bus does
    /// not keep the agent alive. Buses that cannot reach in-process agents
    /// ignore the subscription.
    fn subscribe(&self, _repository: &str, _agent: Weak<Agent>) {}
}

/// A bus that discards every message.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullBus;

impl MessageBus for NullBus {
    fn post(&self, _repository: &str, _event: &Event) {}
}

/// In-process bus that signals the agents subscribed to a repository.
#[derive(Debug, Default)]
pub struct LocalBus {
    subscribers: RwLock<HashMap<String, Vec<Weak<Agent>>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscribers of `repository`.
    pub fn subscribers(&self, repository: &str) -> usize {
        self.subscribers
            .read()
            .expect("bus lock poisoned")
            .get(repository)
            .map_or(0, |agents| agents.iter().filter(|a| a.strong_count() > 0).count())
    }
}

impl MessageBus for LocalBus {
    fn subscribe(&self, repository: &str, agent: Weak<Agent>) {
        self.subscribers
            .write()
            .expect("bus lock poisoned")
            .entry(repository.to_string())
            .or_default()
            .push(agent);
    }

    fn post(&self, repository: &str, event: &Event) {
        let mut subscribers = self.subscribers.write().expect("bus lock poisoned");
        let Some(agents) = subscribers.get_mut(repository) else {
            return;
        };
        agents.retain(|agent| match agent.upgrade() {
            Some(agent) => {
                agent.signal();
                true
            }
            None => false,
        });
        trace!(repository, seq = event.seq, subscribers = agents.len(), "posted event");
    }
}
