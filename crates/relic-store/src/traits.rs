use crate::error::{StoreError, StoreResult};

/// A key/value pair read from a table.
pub type Row = (Vec<u8>, Vec<u8>);

/// Lock taken by a read inside a transaction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LockMode {
    /// Backend default isolation.
    #[default]
    Default,
    /// Read with intent to write: concurrent writers of the same key wait
    /// until this transaction ends. Used for compare-and-swap updates.
    ReadModifyWrite,
    /// Read the latest committed value without holding a lock.
    ReadCommitted,
}

/// A transactional store of named, byte-ordered tables.
///
/// All implementations must satisfy these invariants:
/// - Writes of a transaction become visible to others only on commit.
/// - A transaction dropped without [`Transaction::commit`] is rolled back.
/// - Once closed, [`begin`](Self::begin) fails with [`StoreError::Closed`].
pub trait TransactionalStore: Send + Sync {
    /// Start a transaction.
    fn begin(&self) -> StoreResult<Box<dyn Transaction + '_>>;

    /// Close the store. Further transactions fail.
    fn close(&self);

    /// Returns `true` once [`close`](Self::close) has been called.
    fn is_closed(&self) -> bool;
}

/// An open transaction.
pub trait Transaction {
    /// Read a value. Returns `Ok(None)` if the key does not exist.
    fn get(&mut self, table: &str, key: &[u8], mode: LockMode) -> StoreResult<Option<Vec<u8>>>;

    /// Insert or replace a value.
    fn put(&mut self, table: &str, key: &[u8], value: Vec<u8>) -> StoreResult<()>;

    /// Delete a value. Returns `true` if the key existed.
    fn delete(&mut self, table: &str, key: &[u8]) -> StoreResult<bool>;

    /// Up to `limit` rows with keys strictly greater than `after`, in key
    /// order. `None` starts from the first key.
    fn range(&mut self, table: &str, after: Option<&[u8]>, limit: usize) -> StoreResult<Vec<Row>>;

    /// Up to `limit` rows with keys strictly less than `before`, in reverse
    /// key order. `None` starts from the last key.
    fn range_rev(
        &mut self,
        table: &str,
        before: Option<&[u8]>,
        limit: usize,
    ) -> StoreResult<Vec<Row>>;

    /// The row with the greatest key.
    fn last(&mut self, table: &str) -> StoreResult<Option<Row>> {
        Ok(self.range_rev(table, None, 1)?.into_iter().next())
    }

    /// Next value of the named sequence, starting at 1.
    fn next_sequence(&mut self, name: &str) -> StoreResult<u64>;

    /// Make every write of this transaction durable and visible.
    fn commit(self: Box<Self>) -> StoreResult<()>;
}

/// Run `f` in a transaction, committing on `Ok` and rolling back on `Err`.
pub fn in_transaction<S, T, E, F>(store: &S, f: F) -> Result<T, E>
where
    S: TransactionalStore + ?Sized,
    E: From<StoreError>,
    F: FnOnce(&mut dyn Transaction) -> Result<T, E>,
{
    let mut txn = store.begin()?;
    let value = f(&mut *txn)?;
    txn.commit()?;
    Ok(value)
}
