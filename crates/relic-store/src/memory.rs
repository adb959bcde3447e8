use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::traits::{LockMode, Row, Transaction, TransactionalStore};

type Table = BTreeMap<Vec<u8>, Vec<u8>>;

#[derive(Default)]
struct StoreState {
    tables: HashMap<String, Table>,
    sequences: HashMap<String, u64>,
}

/// In-memory transactional store.
///
/// Intended for tests and embedding. Transactions are serialized: an open
/// transaction holds the store mutex until it commits or is dropped, so
/// every transaction is trivially isolated and every [`LockMode`] behaves
/// like [`LockMode::ReadModifyWrite`].
pub struct InMemoryStore {
    state: Mutex<StoreState>,
    closed: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of rows currently committed in `table`.
    pub fn table_len(&self, table: &str) -> usize {
        self.state
            .lock()
            .expect("lock poisoned")
            .tables
            .get(table)
            .map_or(0, BTreeMap::len)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionalStore for InMemoryStore {
    fn begin(&self) -> StoreResult<Box<dyn Transaction + '_>> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        let guard = self.state.lock().expect("lock poisoned");
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        Ok(Box::new(MemoryTransaction {
            state: guard,
            undo: Vec::new(),
            committed: false,
        }))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("in-memory store closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.state.lock().expect("lock poisoned").tables.len();
        f.debug_struct("InMemoryStore")
            .field("tables", &tables)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Prior state of something a transaction changed.
enum Undo {
    Row {
        table: String,
        key: Vec<u8>,
        previous: Option<Vec<u8>>,
    },
    Sequence {
        name: String,
        previous: u64,
    },
}

struct MemoryTransaction<'a> {
    state: MutexGuard<'a, StoreState>,
    undo: Vec<Undo>,
    committed: bool,
}

impl MemoryTransaction<'_> {
    fn table(&self, table: &str) -> Option<&Table> {
        self.state.tables.get(table)
    }
}

impl Transaction for MemoryTransaction<'_> {
    fn get(&mut self, table: &str, key: &[u8], _mode: LockMode) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.table(table).and_then(|t| t.get(key).cloned()))
    }

    fn put(&mut self, table: &str, key: &[u8], value: Vec<u8>) -> StoreResult<()> {
        let previous = self
            .state
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(key.to_vec(), value);
        self.undo.push(Undo::Row {
            table: table.to_string(),
            key: key.to_vec(),
            previous,
        });
        Ok(())
    }

    fn delete(&mut self, table: &str, key: &[u8]) -> StoreResult<bool> {
        let previous = self
            .state
            .tables
            .get_mut(table)
            .and_then(|t| t.remove(key));
        let existed = previous.is_some();
        if existed {
            self.undo.push(Undo::Row {
                table: table.to_string(),
                key: key.to_vec(),
                previous,
            });
        }
        Ok(existed)
    }

    fn range(&mut self, table: &str, after: Option<&[u8]>, limit: usize) -> StoreResult<Vec<Row>> {
        let Some(t) = self.table(table) else {
            return Ok(Vec::new());
        };
        let lower = match after {
            Some(key) => Bound::Excluded(key.to_vec()),
            None => Bound::Unbounded,
        };
        Ok(t.range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn range_rev(
        &mut self,
        table: &str,
        before: Option<&[u8]>,
        limit: usize,
    ) -> StoreResult<Vec<Row>> {
        let Some(t) = self.table(table) else {
            return Ok(Vec::new());
        };
        let upper = match before {
            Some(key) => Bound::Excluded(key.to_vec()),
            None => Bound::Unbounded,
        };
        Ok(t.range((Bound::Unbounded, upper))
            .rev()
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn next_sequence(&mut self, name: &str) -> StoreResult<u64> {
        let counter = self.state.sequences.entry(name.to_string()).or_insert(0);
        let previous = *counter;
        *counter += 1;
        let next = *counter;
        self.undo.push(Undo::Sequence {
            name: name.to_string(),
            previous,
        });
        Ok(next)
    }

    fn commit(mut self: Box<Self>) -> StoreResult<()> {
        self.committed = true;
        self.undo.clear();
        Ok(())
    }
}

impl Drop for MemoryTransaction<'_> {
    fn drop(&mut self) {
        if self.committed || self.undo.is_empty() {
            return;
        }
        debug!(changes = self.undo.len(), "rolling back transaction");
        while let Some(undo) = self.undo.pop() {
            match undo {
                Undo::Row {
                    table,
                    key,
                    previous,
                } => {
                    let t = self.state.tables.entry(table).or_default();
                    match previous {
                        Some(value) => {
                            t.insert(key, value);
                        }
                        None => {
                            t.remove(&key);
                        }
                    }
                }
                Undo::Sequence { name, previous } => {
                    self.state.sequences.insert(name, previous);
                }
            }
        }
    }
}
