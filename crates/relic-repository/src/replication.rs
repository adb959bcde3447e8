//! One-way replication between repositories.
//!
//! A replication is an [`Agent`] that replays the source's event log and
//! ingests each touched content into the destination: committed bytes
//! first, then the revision tree through the merge path. Its cursor lives
//! in the destination, under `replication:<source>`, so a restarted
//! replication resumes where it stopped.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use relic_agent::{Agent, AgentInfo, AgentResult, EventHandler};
use relic_types::Event;

use crate::bus::MessageBus;
use crate::error::{RepositoryError, RepositoryResult};
use crate::repository::{Core, Repository};

/// Cursor key of the replication from `source`.
pub fn replication_key(source: &str) -> String {
    format!("replication:{source}")
}

struct Replicator {
    source: Arc<Core>,
    destination: Arc<Core>,
}

impl Replicator {
    fn replicate(&self, event: &Event) -> RepositoryResult<()> {
        let content = &event.content;
        let tree = self.source.tree(content)?;
        self.destination.ensure_open()?;

        if !tree.is_deleted() && !self.destination.content.exists(content) {
            if let Some(reader) = self.source.open_content(content)? {
                self.destination.content.add_from(content, reader)?;
            }
        }
        let result = self.destination.merge_tree(tree)?;
        debug!(
            source = %self.source.name,
            destination = %self.destination.name,
            seq = event.seq,
            content = %content.short_hex(),
            no_op = result.is_no_op(),
            "replicated event"
        );
        Ok(())
    }
}

impl EventHandler for Replicator {
    fn process(&self, event: &Event) -> AgentResult<()> {
        Ok(self.replicate(event)?)
    }
}

/// State of one running or finished replication.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationInfo {
    pub source: String,
    pub destination: String,
    pub agent: AgentInfo,
}

/// Registry of replications, keyed by source and destination name.
#[derive(Default)]
pub struct Replications {
    agents: Mutex<BTreeMap<(String, String), Arc<Agent>>>,
}

impl Replications {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start replicating `source` into `destination`.
    ///
    /// A finished replication of the same pair is replaced; a live one is
    /// an error.
    pub fn start_replication(&self, source: &Repository, destination: &Repository) -> RepositoryResult<AgentInfo> {
        if source.name() == destination.name() {
            return Err(RepositoryError::InvalidRequest(format!(
                "cannot replicate {} into itself",
                source.name()
            )));
        }
        let source = source.core();
        let destination = destination.core();
        source.ensure_open()?;
        destination.ensure_open()?;

        let pair = (source.name.clone(), destination.name.clone());
        let mut agents = self.agents.lock().expect("replications lock poisoned");
        if let Some(existing) = agents.get(&pair) {
            if !existing.info().state.is_terminal() {
                return Err(RepositoryError::InvalidRequest(format!(
                    "replication from {} to {} is already running",
                    pair.0, pair.1
                )));
            }
        }

        let handler = Replicator {
            source: Arc::clone(source),
            destination: Arc::clone(destination),
        };
        let agent = Arc::new(
            Agent::new(
                replication_key(&source.name),
                source.clone(),
                destination.clone(),
                Arc::new(handler),
            )
            .with_batch_size(destination.config.agent_batch_size),
        );
        source.watch(&agent);
        destination.watch(&agent);
        source.bus.subscribe(&source.name, Arc::downgrade(&agent));
        agent.start()?;

        info!(source = %pair.0, destination = %pair.1, "replication started");
        let info = agent.info();
        agents.insert(pair, agent);
        Ok(info)
    }

    /// Stop the replication of `source` into `destination`, returning its
    /// final state.
    pub fn stop_replication(&self, source: &str, destination: &str) -> Option<AgentInfo> {
        let agent = self
            .agents
            .lock()
            .expect("replications lock poisoned")
            .remove(&(source.to_string(), destination.to_string()))?;
        agent.stop();
        info!(source, destination, "replication stopped");
        Some(agent.info())
    }

    pub fn info(&self, source: &str, destination: &str) -> Option<AgentInfo> {
        self.agents
            .lock()
            .expect("replications lock poisoned")
            .get(&(source.to_string(), destination.to_string()))
            .map(|agent| agent.info())
    }

    pub fn list(&self) -> Vec<ReplicationInfo> {
        self.agents
            .lock()
            .expect("replications lock poisoned")
            .iter()
            .map(|((source, destination), agent)| ReplicationInfo {
                source: source.clone(),
                destination: destination.clone(),
                agent: agent.info(),
            })
            .collect()
    }

    /// Stop every replication.
    pub fn stop_all(&self) {
        let agents = std::mem::take(&mut *self.agents.lock().expect("replications lock poisoned"));
        for agent in agents.values() {
            agent.stop();
        }
    }
}

impl Drop for Replications {
    fn drop(&mut self) {
        self.stop_all();
    }
}

impl std::fmt::Debug for Replications {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replications")
            .field("replications", &self.list())
            .finish()
    }
}
