//! Metadata-level diff: compare two metadata maps.
//!
//! A diff maps every changed key to its new value. Removed keys map to
//! `None`. Unchanged keys are absent from the diff.

use std::collections::BTreeMap;

use relic_types::{Metadata, Value};

/// Changed and removed keys between two metadata maps.
pub type MetadataDiff = BTreeMap<String, Option<Value>>;

/// Compute the diff that turns `base` into `target`.
///
/// Keys present only in `target`, or present in both with different values,
/// map to `Some(new)`. Keys present only in `base` map to `None`.
pub fn diff(base: &Metadata, target: &Metadata) -> MetadataDiff {
    let mut changes = MetadataDiff::new();

    for (key, old) in base {
        match target.get(key) {
            Some(new) if new != old => {
                changes.insert(key.clone(), Some(new.clone()));
            }
            Some(_) => {}
            None => {
                changes.insert(key.clone(), None);
            }
        }
    }

    for (key, new) in target {
        if !base.contains_key(key) {
            changes.insert(key.clone(), Some(new.clone()));
        }
    }

    changes
}

/// Apply a diff to `base`, producing the resulting metadata.
pub fn apply(base: &Metadata, changes: &MetadataDiff) -> Metadata {
    let mut result = base.clone();
    for (key, change) in changes {
        match change {
            Some(value) => {
                result.insert(key.clone(), value.clone());
            }
            None => {
                result.remove(key);
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make(pairs: &[(&str, Value)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn identical_maps_no_diff() {
        let state = make(&[("a", Value::Integer(1)), ("b", Value::from("hello"))]);
        assert!(diff(&state, &state).is_empty());
    }

    #[test]
    fn empty_to_populated() {
        let new = make(&[("x", Value::Integer(42)), ("y", Value::from("new"))]);
        let changes = diff(&Metadata::new(), &new);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes["x"], Some(Value::Integer(42)));
    }

    #[test]
    fn removal_is_none() {
        let old = make(&[("x", Value::Integer(42))]);
        let changes = diff(&old, &Metadata::new());
        assert_eq!(changes.len(), 1);
        assert_eq!(changes["x"], None);
    }

    #[test]
    fn null_value_differs_from_removal() {
        let old = make(&[("x", Value::Integer(1))]);
        let new = make(&[("x", Value::Null)]);
        let changes = diff(&old, &new);
        assert_eq!(changes["x"], Some(Value::Null));
    }

    #[test]
    fn mixed_changes_apply_back() {
        let old = make(&[
            ("keep", Value::Boolean(true)),
            ("modify", Value::from("old")),
            ("remove", Value::Integer(42)),
        ]);
        let new = make(&[
            ("keep", Value::Boolean(true)),
            ("modify", Value::from("new")),
            ("added", Value::List(vec![Value::Integer(1)])),
        ]);
        let changes = diff(&old, &new);
        assert_eq!(changes.len(), 3);
        assert!(!changes.contains_key("keep"));
        assert_eq!(apply(&old, &changes), new);
    }

    #[test]
    fn type_change_detected() {
        let old = make(&[("value", Value::Integer(42))]);
        let new = make(&[("value", Value::from("forty-two"))]);
        assert_eq!(diff(&old, &new).len(), 1);
    }
}
