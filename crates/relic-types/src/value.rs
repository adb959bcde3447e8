//! Typed metadata values.
//!
//! Revision metadata is an ordered map from string keys to [`Value`]s.
//! Ordering matters: revision hashes are computed over the canonical
//! encoding of the map (see [`encode_metadata`]), so two maps with the same
//! entries always hash identically.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hash::Hash;

/// Metadata attached to a revision.
pub type Metadata = BTreeMap<String, Value>;

/// A typed metadata value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Decimal(f64),
    Text(String),
    Binary(Vec<u8>),
    Hash(Hash),
    Date(DateTime<Utc>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Returns `true` for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Short name of the value's type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::Decimal(_) => "decimal",
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
            Self::Hash(_) => "hash",
            Self::Date(_) => "date",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    /// Collect every textual leaf of this value, depth first.
    pub fn texts(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_texts(&mut out);
        out
    }

    /// Append the canonical binary encoding of this value to `out`.
    ///
    /// Each value is a one-byte tag followed by a fixed layout; lengths are
    /// little-endian `u64`. The layout never changes for a given tag.
    pub fn encode_canonical(&self, out: &mut Vec<u8>) {
        match self {
            Self::Null => out.push(0),
            Self::Boolean(b) => {
                out.push(1);
                out.push(u8::from(*b));
            }
            Self::Integer(i) => {
                out.push(2);
                out.extend_from_slice(&i.to_le_bytes());
            }
            Self::Decimal(f) => {
                out.push(3);
                out.extend_from_slice(&f.to_bits().to_le_bytes());
            }
            Self::Text(s) => {
                out.push(4);
                encode_bytes(s.as_bytes(), out);
            }
            Self::Binary(bytes) => {
                out.push(5);
                encode_bytes(bytes, out);
            }
            Self::Hash(h) => {
                out.push(6);
                out.extend_from_slice(h.as_bytes());
            }
            Self::Date(d) => {
                out.push(7);
                out.extend_from_slice(&d.timestamp().to_le_bytes());
                out.extend_from_slice(&d.timestamp_subsec_nanos().to_le_bytes());
            }
            Self::List(items) => {
                out.push(8);
                out.extend_from_slice(&(items.len() as u64).to_le_bytes());
                items.iter().for_each(|v| v.encode_canonical(out));
            }
            Self::Map(entries) => {
                out.push(9);
                encode_metadata(entries, out);
            }
        }
    }

    fn collect_texts<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Text(s) => out.push(s),
            Self::List(items) => items.iter().for_each(|v| v.collect_texts(out)),
            Self::Map(entries) => entries.values().for_each(|v| v.collect_texts(out)),
            _ => {}
        }
    }
}

/// Append the canonical encoding of a metadata map to `out`.
///
/// Entries are written in key order, so the encoding depends only on the
/// map's contents.
pub fn encode_metadata(metadata: &Metadata, out: &mut Vec<u8>) {
    out.extend_from_slice(&(metadata.len() as u64).to_le_bytes());
    for (key, value) in metadata {
        encode_bytes(key.as_bytes(), out);
        value.encode_canonical(out);
    }
}

fn encode_bytes(bytes: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
    out.extend_from_slice(bytes);
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Decimal(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Hash> for Value {
    fn from(h: Hash) -> Self {
        Self::Hash(h)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Self::Date(d)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Boolean(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Integer(i),
                None => Self::Decimal(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Self::Text(s),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(entries) => Self::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Self::from(v)))
                    .collect(),
            ),
        }
    }
}
