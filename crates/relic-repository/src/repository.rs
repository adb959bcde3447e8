use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use relic_agent::{Agent, AgentError, AgentInfo, AgentResult, CursorStore, EventSource};
use relic_content::{ContentError, ContentLock, ContentManager, ContentReader, ContentState, StagingSession};
use relic_dag::{Revision, RevisionTree};
use relic_ledger::{CursorTable, EventLog, RevisionManager};
use relic_store::{in_transaction, InMemoryStore, Transaction, TransactionalStore};
use relic_types::{CommandResult, Event, Hash, Operation};

use crate::bus::{LocalBus, MessageBus};
use crate::config::RepositoryConfig;
use crate::error::{RepositoryError, RepositoryResult};
use crate::index::{Index, IndexMatch, MemoryIndex};
use crate::indexer::Indexer;
use crate::stats::{self, Statistics, StatsRecorder};

/// Cursor key of the indexing agent.
pub const INDEX_AGENT: &str = "index";
/// Cursor key of the statistics agent.
pub const STATS_AGENT: &str = "stats";

/// Repository state shared with the agents that consume its log.
pub(crate) struct Core {
    pub(crate) name: String,
    pub(crate) config: RepositoryConfig,
    store: Arc<dyn TransactionalStore>,
    pub(crate) content: ContentManager,
    pub(crate) index: Arc<dyn Index>,
    pub(crate) bus: Arc<dyn MessageBus>,
    pub(crate) revisions: RevisionManager,
    events: EventLog,
    cursors: CursorTable,
    watchers: Mutex<Vec<Weak<Agent>>>,
    closed: AtomicBool,
}

impl Core {
    pub(crate) fn ensure_open(&self) -> RepositoryResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RepositoryError::Closed(self.name.clone()));
        }
        Ok(())
    }

    /// Run `f` in one transaction of the repository's store.
    pub(crate) fn transaction<T, F>(&self, f: F) -> RepositoryResult<T>
    where
        F: FnOnce(&mut dyn Transaction) -> RepositoryResult<T>,
    {
        self.ensure_open()?;
        in_transaction(&*self.store, f)
    }

    /// Run a mutation of `content` and record its event in the same
    /// transaction. Once committed, announce the event.
    ///
    /// The content lock is taken before the transaction begins and released
    /// after it ends, so a stream holding the content open delays only
    /// mutations of that content.
    fn apply<F>(&self, content: &Hash, f: F) -> RepositoryResult<CommandResult>
    where
        F: FnOnce(&mut dyn Transaction, &ContentLock<'_>) -> RepositoryResult<CommandResult>,
    {
        self.ensure_open()?;
        let lock = self.content.lock(content)?;
        let (result, event) = self.transaction(|txn| {
            let result = f(txn, &lock)?;
            let event = self.events.record(txn, &result)?;
            Ok((result, event))
        })?;
        drop(lock);
        if let Some(event) = event {
            debug!(
                repository = %self.name,
                seq = event.seq,
                operation = %event.operation,
                content = %event.content.short_hex(),
                "applied change"
            );
            self.notify(&event);
        }
        Ok(result)
    }

    fn notify(&self, event: &Event) {
        self.bus.post(&self.name, event);
        self.signal_watchers();
    }

    /// Signal `agent` after every change and on close.
    pub(crate) fn watch(&self, agent: &Arc<Agent>) {
        self.watchers
            .lock()
            .expect("watchers lock poisoned")
            .push(Arc::downgrade(agent));
    }

    fn signal_watchers(&self) {
        let mut watchers = self.watchers.lock().expect("watchers lock poisoned");
        watchers.retain(|agent| match agent.upgrade() {
            Some(agent) => {
                agent.signal();
                true
            }
            None => false,
        });
    }

    pub(crate) fn get_tree(&self, content: &Hash) -> RepositoryResult<Option<RevisionTree>> {
        self.transaction(|txn| Ok(self.revisions.get(txn, content)?))
    }

    pub(crate) fn tree(&self, content: &Hash) -> RepositoryResult<RevisionTree> {
        self.transaction(|txn| Ok(self.revisions.tree(txn, content)?))
    }

    /// Merge an externally produced tree. Committed bytes of content that
    /// becomes deleted are removed.
    pub(crate) fn merge_tree(&self, tree: RevisionTree) -> RepositoryResult<CommandResult> {
        let content = tree.content();
        self.apply(&content, |txn, lock| {
            let result = self.revisions.put_tree(txn, tree)?;
            drop_deleted_bytes(lock, &result)?;
            Ok(result)
        })
    }

    /// A stream over the whole committed content, if present.
    pub(crate) fn open_content(&self, content: &Hash) -> RepositoryResult<Option<ContentReader>> {
        self.ensure_open()?;
        match self.content.get(content, 0, u64::MAX) {
            Ok(reader) => Ok(Some(reader)),
            Err(ContentError::UnknownContent(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) fn read_content(&self, content: &Hash) -> RepositoryResult<Option<Vec<u8>>> {
        match self.open_content(content)? {
            Some(reader) => Ok(Some(reader.read_all()?)),
            None => Ok(None),
        }
    }
}

fn drop_deleted_bytes(lock: &ContentLock<'_>, result: &CommandResult) -> RepositoryResult<()> {
    if result.operation() == Some(Operation::Delete) {
        lock.delete()?;
    }
    Ok(())
}

impl EventSource for Core {
    fn fetch(&self, after: u64, limit: usize) -> AgentResult<Vec<Event>> {
        Ok(self.transaction(|txn| Ok(self.events.after(txn, after, limit)?))?)
    }

    fn last_seq(&self) -> AgentResult<u64> {
        Ok(self.transaction(|txn| Ok(self.events.last_seq(txn)?))?)
    }
}

impl CursorStore for Core {
    fn load(&self, key: &str) -> AgentResult<u64> {
        Ok(self.transaction(|txn| Ok(self.cursors.load(txn, key)?))?)
    }

    fn save(&self, key: &str, seq: u64) -> AgentResult<()> {
        self.transaction(|txn| Ok(self.cursors.save(txn, key, seq)?))
            .map_err(AgentError::from)
    }
}

/// Public snapshot of a repository.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub name: String,
    pub index_agent: AgentInfo,
    pub stats_agent: AgentInfo,
    pub closed: bool,
}

/// A named store of contents and their revision trees.
///
/// Mutations run in one transaction that updates the revision tree, moves
/// content bytes and appends an event. Committed events are then announced
/// on the [`MessageBus`] and wake the repository's indexing and statistics
/// agents, which replay the event log on their own threads.
pub struct Repository {
    core: Arc<Core>,
    index_agent: Arc<Agent>,
    stats_agent: Arc<Agent>,
}

impl Repository {
    /// Open a repository keeping content bytes under `path`.
    pub fn open(
        name: impl Into<String>,
        path: &Path,
        config: RepositoryConfig,
        store: Arc<dyn TransactionalStore>,
        index: Arc<dyn Index>,
        bus: Arc<dyn MessageBus>,
    ) -> RepositoryResult<Self> {
        let name = name.into();
        let content = ContentManager::open(path, &config.staging())?;
        let core = Arc::new(Core {
            name,
            config,
            store,
            content,
            index,
            bus,
            revisions: RevisionManager::new(),
            events: EventLog::new(),
            cursors: CursorTable::new(),
            watchers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });

        let batch_size = core.config.agent_batch_size;
        let index_agent = Arc::new(
            Agent::new(
                INDEX_AGENT,
                core.clone(),
                core.clone(),
                Arc::new(Indexer::new(core.clone())),
            )
            .with_batch_size(batch_size),
        );
        let stats_agent = Arc::new(
            Agent::new(
                STATS_AGENT,
                core.clone(),
                core.clone(),
                Arc::new(StatsRecorder::new(core.clone())),
            )
            .with_batch_size(batch_size),
        );
        for agent in [&index_agent, &stats_agent] {
            core.watch(agent);
            agent.start()?;
        }

        info!(repository = %core.name, path = %path.display(), "repository opened");
        Ok(Self {
            core,
            index_agent,
            stats_agent,
        })
    }

    /// Open a repository backed by an in-memory store and index, with a
    /// private [`LocalBus`].
    pub fn open_in_memory(
        name: impl Into<String>,
        path: &Path,
        config: RepositoryConfig,
    ) -> RepositoryResult<Self> {
        Self::open(
            name,
            path,
            config,
            Arc::new(InMemoryStore::new()),
            Arc::new(MemoryIndex::new()),
            Arc::new(LocalBus::new()),
        )
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.core.config
    }

    pub(crate) fn core(&self) -> &Arc<Core> {
        &self.core
    }

    // ---- Content staging ----

    pub fn stage_content(&self, content: &Hash) -> RepositoryResult<StagingSession> {
        self.core.ensure_open()?;
        Ok(self.core.content.stage(content)?)
    }

    pub fn write_content<R: Read>(
        &self,
        content: &Hash,
        session_id: Uuid,
        source: R,
        position: u64,
    ) -> RepositoryResult<StagingSession> {
        self.core.ensure_open()?;
        Ok(self.core.content.write(content, session_id, source, position)?)
    }

    pub fn unstage_content(&self, content: &Hash, session_id: Uuid) -> RepositoryResult<StagingSession> {
        self.core.ensure_open()?;
        Ok(self.core.content.unstage(content, session_id)?)
    }

    /// Stream `length` bytes of committed content from `offset`.
    pub fn get_content(&self, content: &Hash, offset: u64, length: u64) -> RepositoryResult<ContentReader> {
        self.core.ensure_open()?;
        Ok(self.core.content.get(content, offset, length)?)
    }

    pub fn content_state(&self, content: &Hash) -> RepositoryResult<ContentState> {
        self.core.ensure_open()?;
        Ok(self.core.content.state(content)?)
    }

    // ---- Revisions ----

    /// Add a revision whose parents are the current head.
    ///
    /// If the content bytes are not committed yet, the staged bytes are
    /// committed in the same transaction; without them the call fails with
    /// `UnknownContent` and nothing changes.
    pub fn add_revision(&self, revision: Revision) -> RepositoryResult<CommandResult> {
        let content = revision.content();
        let deleted = revision.is_deleted();
        self.core.apply(&content, |txn, lock| {
            let needs_bytes = !deleted && !lock.exists();
            let result = self.core.revisions.put(txn, revision)?;
            if needs_bytes && !result.is_no_op() {
                lock.add()?;
            }
            Ok(result)
        })
    }

    /// Add a revision together with its content bytes, bypassing staging.
    ///
    /// The bytes are copied aside and verified before the transaction
    /// starts; they are committed only if the revision is.
    pub fn add_revision_with<R: Read>(&self, revision: Revision, source: R) -> RepositoryResult<CommandResult> {
        let content = revision.content();
        let deleted = revision.is_deleted();
        let prepared = if deleted || self.core.content.exists(&content) {
            None
        } else {
            self.core.ensure_open()?;
            Some(self.core.content.prepare(&content, source)?)
        };
        self.core.apply(&content, |txn, lock| {
            let needs_bytes = !deleted && !lock.exists();
            let result = self.core.revisions.put(txn, revision)?;
            if needs_bytes && !result.is_no_op() {
                let prepared = prepared.ok_or(ContentError::UnknownContent(content))?;
                lock.commit(prepared)?;
            }
            Ok(result)
        })
    }

    /// Merge an externally produced tree into the stored one.
    pub fn merge_tree(&self, tree: RevisionTree) -> RepositoryResult<CommandResult> {
        self.core.merge_tree(tree)
    }

    /// Delete content whose head is still `expected_head`.
    pub fn delete_content(&self, content: &Hash, expected_head: &BTreeSet<Hash>) -> RepositoryResult<CommandResult> {
        self.core.apply(content, |txn, lock| {
            let result = self.core.revisions.delete(txn, content, expected_head)?;
            drop_deleted_bytes(lock, &result)?;
            Ok(result)
        })
    }

    pub fn get_tree(&self, content: &Hash) -> RepositoryResult<RevisionTree> {
        self.core.tree(content)
    }

    pub fn get_head(&self, content: &Hash) -> RepositoryResult<BTreeSet<Hash>> {
        self.core
            .transaction(|txn| Ok(self.core.revisions.head(txn, content)?))
    }

    pub fn get_revisions(&self, content: &Hash, revisions: &[Hash]) -> RepositoryResult<Vec<Revision>> {
        self.core
            .transaction(|txn| Ok(self.core.revisions.revisions(txn, content, revisions)?))
    }

    // ---- Log, search and statistics ----

    /// A page of the event log. A `count` of 0 uses the configured page size.
    pub fn history(&self, ascending: bool, first: usize, count: usize) -> RepositoryResult<Vec<Event>> {
        let count = if count == 0 {
            self.core.config.history_page_size
        } else {
            count
        };
        self.core
            .transaction(|txn| Ok(self.core.events.history(txn, ascending, first, count)?))
    }

    pub fn find(&self, query: &str, first: usize, count: usize) -> RepositoryResult<Vec<IndexMatch>> {
        self.core.ensure_open()?;
        self.core.index.find(query, first, count)
    }

    pub fn statistics(&self) -> RepositoryResult<Statistics> {
        self.core.transaction(stats::load)
    }

    pub fn info(&self) -> RepositoryInfo {
        RepositoryInfo {
            name: self.core.name.clone(),
            index_agent: self.index_agent.info(),
            stats_agent: self.stats_agent.info(),
            closed: self.is_closed(),
        }
    }

    // ---- Lifecycle ----

    /// Stop the agents, force-close open content streams and the store.
    /// Every later call fails with `RepositoryClosed`.
    pub fn close(&self) {
        if self.core.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Closing content first fails every caller blocked on a content
        // lock, so no agent is left waiting when it is joined.
        self.core.content.close();
        self.core.store.close();
        // Replication agents observe the closure on their next step.
        self.core.signal_watchers();
        self.index_agent.stop();
        self.stats_agent.stop();
        info!(repository = %self.core.name, "repository closed");
    }

    pub fn is_closed(&self) -> bool {
        self.core.closed.load(Ordering::SeqCst)
    }
}

impl Drop for Repository {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("name", &self.core.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}
