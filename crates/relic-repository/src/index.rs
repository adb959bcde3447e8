//! Full-text index collaborator.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use relic_dag::RevisionTree;
use relic_types::{Hash, Value};

use crate::error::RepositoryResult;

/// A content matching a query, with the head revisions that matched.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMatch {
    pub content: Hash,
    pub revisions: BTreeSet<Hash>,
}

/// Searchable view of a repository's contents.
pub trait Index: Send + Sync {
    /// Index the head of `tree`, plus `content` bytes when available.
    fn index(&self, tree: &RevisionTree, content: Option<&[u8]>) -> RepositoryResult<()>;

    fn delete(&self, content: &Hash) -> RepositoryResult<()>;

    /// Ranked matches for `query`: skip `first`, return up to `count`.
    fn find(&self, query: &str, first: usize, count: usize) -> RepositoryResult<Vec<IndexMatch>>;
}

#[derive(Debug)]
struct Document {
    revisions: BTreeSet<Hash>,
    terms: BTreeSet<String>,
}

/// In-process [`Index`] over textual metadata and UTF-8 content.
///
/// Terms are lowercased alphanumeric runs. A document matches when it
/// contains at least one query term; matches are ordered by the number of
/// query terms they contain, then by content hash.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    documents: RwLock<BTreeMap<Hash, Document>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.read().expect("index lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, content: &Hash) -> bool {
        self.documents
            .read()
            .expect("index lock poisoned")
            .contains_key(content)
    }
}

impl Index for MemoryIndex {
    fn index(&self, tree: &RevisionTree, content: Option<&[u8]>) -> RepositoryResult<()> {
        let mut terms = BTreeSet::new();
        for revision in tree.head_revisions() {
            for value in revision.metadata().values() {
                collect_value_terms(value, &mut terms);
            }
        }
        if let Some(text) = content.and_then(|bytes| std::str::from_utf8(bytes).ok()) {
            collect_terms(text, &mut terms);
        }
        let document = Document {
            revisions: tree.head().clone(),
            terms,
        };
        self.documents
            .write()
            .expect("index lock poisoned")
            .insert(tree.content(), document);
        Ok(())
    }

    fn delete(&self, content: &Hash) -> RepositoryResult<()> {
        self.documents
            .write()
            .expect("index lock poisoned")
            .remove(content);
        Ok(())
    }

    fn find(&self, query: &str, first: usize, count: usize) -> RepositoryResult<Vec<IndexMatch>> {
        let mut wanted = BTreeSet::new();
        collect_terms(query, &mut wanted);
        if wanted.is_empty() {
            return Ok(Vec::new());
        }

        let documents = self.documents.read().expect("index lock poisoned");
        let mut scored: Vec<(usize, &Hash, &Document)> = documents
            .iter()
            .filter_map(|(hash, doc)| {
                let score = wanted.iter().filter(|t| doc.terms.contains(*t)).count();
                (score > 0).then_some((score, hash, doc))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));

        Ok(scored
            .into_iter()
            .skip(first)
            .take(count)
            .map(|(_, hash, doc)| IndexMatch {
                content: *hash,
                revisions: doc.revisions.clone(),
            })
            .collect())
    }
}

fn collect_terms(text: &str, terms: &mut BTreeSet<String>) {
    terms.extend(
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase),
    );
}

fn collect_value_terms(value: &Value, terms: &mut BTreeSet<String>) {
    match value {
        Value::Text(s) => collect_terms(s, terms),
        Value::List(items) => items.iter().for_each(|v| collect_value_terms(v, terms)),
        Value::Map(map) => map.values().for_each(|v| collect_value_terms(v, terms)),
        _ => {}
    }
}
