use relic_store::codec::{decode, encode};
use relic_store::{LockMode, Transaction};

use crate::error::LedgerResult;

/// Last processed event sequence number, per agent key.
#[derive(Clone, Copy, Debug)]
pub struct CursorTable {
    table: &'static str,
}

impl CursorTable {
    pub const DEFAULT_TABLE: &'static str = "cursors";

    pub fn new() -> Self {
        Self {
            table: Self::DEFAULT_TABLE,
        }
    }

    /// Cursor of `key`, or 0 if the agent never saved one.
    pub fn load(&self, txn: &mut dyn Transaction, key: &str) -> LedgerResult<u64> {
        match txn.get(self.table, key.as_bytes(), LockMode::Default)? {
            Some(bytes) => Ok(decode(&bytes)?),
            None => Ok(0),
        }
    }

    pub fn save(&self, txn: &mut dyn Transaction, key: &str, seq: u64) -> LedgerResult<()> {
        txn.put(self.table, key.as_bytes(), encode(&seq)?)?;
        Ok(())
    }
}

impl Default for CursorTable {
    fn default() -> Self {
        Self::new()
    }
}
