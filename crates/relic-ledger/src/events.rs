//! Append-only event log.
//!
//! Events are keyed by their sequence number, drawn from the store's
//! sequence generator inside the transaction that applies the change. A
//! rolled-back change therefore never leaves an event behind.

use std::collections::BTreeSet;

use tracing::trace;

use relic_store::codec::{decode, encode, seq_from_key, seq_key};
use relic_store::{Row, Transaction};
use relic_types::{CommandResult, Event, Hash, Operation};

use crate::error::LedgerResult;

#[derive(Clone, Copy, Debug)]
pub struct EventLog {
    table: &'static str,
}

impl EventLog {
    pub const DEFAULT_TABLE: &'static str = "events";

    pub fn new() -> Self {
        Self {
            table: Self::DEFAULT_TABLE,
        }
    }

    /// Append an event with the next sequence number.
    pub fn append(
        &self,
        txn: &mut dyn Transaction,
        operation: Operation,
        content: Hash,
        head: BTreeSet<Hash>,
    ) -> LedgerResult<Event> {
        let seq = txn.next_sequence(self.table)?;
        let event = Event::new(seq, operation, content, head);
        txn.put(self.table, &seq_key(seq), encode(&event)?)?;
        trace!(seq, %operation, content = %content.short_hex(), "appended event");
        Ok(event)
    }

    /// Append the event of an applied command. No-ops append nothing.
    pub fn record(
        &self,
        txn: &mut dyn Transaction,
        result: &CommandResult,
    ) -> LedgerResult<Option<Event>> {
        match result {
            CommandResult::NoOp => Ok(None),
            CommandResult::Applied {
                operation,
                content,
                head,
            } => self
                .append(txn, *operation, *content, head.clone())
                .map(Some),
        }
    }

    /// Up to `limit` events with a sequence number greater than `seq`.
    pub fn after(&self, txn: &mut dyn Transaction, seq: u64, limit: usize) -> LedgerResult<Vec<Event>> {
        let rows = txn.range(self.table, Some(&seq_key(seq)[..]), limit)?;
        decode_rows(rows)
    }

    /// A page of the log: skip `first` events, then return up to `count`.
    pub fn history(
        &self,
        txn: &mut dyn Transaction,
        ascending: bool,
        first: usize,
        count: usize,
    ) -> LedgerResult<Vec<Event>> {
        let window = first.saturating_add(count);
        let rows = if ascending {
            txn.range(self.table, None, window)?
        } else {
            txn.range_rev(self.table, None, window)?
        };
        decode_rows(rows.into_iter().skip(first).collect())
    }

    /// Sequence number of the last event, or 0 if the log is empty.
    pub fn last_seq(&self, txn: &mut dyn Transaction) -> LedgerResult<u64> {
        match txn.last(self.table)? {
            Some((key, _)) => Ok(seq_from_key(self.table, &key)?),
            None => Ok(0),
        }
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_rows(rows: Vec<Row>) -> LedgerResult<Vec<Event>> {
    rows.iter()
        .map(|(_, value)| decode(value).map_err(Into::into))
        .collect()
}
