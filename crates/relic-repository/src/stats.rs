//! Repository usage statistics, maintained by the statistics agent.
//!
//! The whole summary is one row of the `stats` table. It records the last
//! event it accounts for, so replaying an event never counts it twice.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use relic_agent::{AgentResult, EventHandler};
use relic_store::codec::{decode, encode};
use relic_store::{LockMode, Transaction};
use relic_types::{Event, Operation};

use crate::error::RepositoryResult;
use crate::repository::Core;

const STATS_TABLE: &str = "stats";
const SUMMARY_KEY: &[u8] = b"summary";

/// Counts of applied operations and of metadata key usage.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    /// Sequence number of the last event counted.
    pub seq: u64,
    pub creates: u64,
    pub updates: u64,
    pub deletes: u64,
    /// Number of head revisions, per event, that carried each key.
    pub keys: BTreeMap<String, u64>,
}

impl Statistics {
    /// Total number of counted operations.
    pub fn operations(&self) -> u64 {
        self.creates + self.updates + self.deletes
    }

    pub fn to_json(&self) -> RepositoryResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn count(&mut self, operation: Operation) {
        match operation {
            Operation::Create => self.creates += 1,
            Operation::Update => self.updates += 1,
            Operation::Delete => self.deletes += 1,
        }
    }
}

pub(crate) fn load(txn: &mut dyn Transaction) -> RepositoryResult<Statistics> {
    match txn.get(STATS_TABLE, SUMMARY_KEY, LockMode::ReadModifyWrite)? {
        Some(bytes) => Ok(decode(&bytes)?),
        None => Ok(Statistics::default()),
    }
}

fn save(txn: &mut dyn Transaction, stats: &Statistics) -> RepositoryResult<()> {
    txn.put(STATS_TABLE, SUMMARY_KEY, encode(stats)?)?;
    Ok(())
}

pub(crate) struct StatsRecorder {
    core: Arc<Core>,
}

impl StatsRecorder {
    pub(crate) fn new(core: Arc<Core>) -> Self {
        Self { core }
    }

    fn record(&self, event: &Event) -> RepositoryResult<()> {
        self.core.transaction(|txn| {
            let mut stats = load(txn)?;
            if event.seq <= stats.seq {
                return Ok(());
            }
            stats.count(event.operation);
            if event.operation != Operation::Delete {
                let head: Vec<_> = event.revisions.iter().copied().collect();
                let revisions = self.core.revisions.revisions(txn, &event.content, &head)?;
                for revision in &revisions {
                    for key in revision.metadata().keys() {
                        *stats.keys.entry(key.clone()).or_insert(0) += 1;
                    }
                }
            }
            stats.seq = event.seq;
            save(txn, &stats)
        })
    }
}

impl EventHandler for StatsRecorder {
    fn process(&self, event: &Event) -> AgentResult<()> {
        Ok(self.record(event)?)
    }
}
