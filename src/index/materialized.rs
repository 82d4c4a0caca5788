use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use crate::core::types::{Fields, Value};
use crate::index::inverted::InvertedIndex;

/// One component of a reduce key. An absent group-by field and an explicit
/// null are different keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyPart {
    Missing,
    Present(Value),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReduceKey(pub Vec<KeyPart>);

impl ReduceKey {
    pub fn of(row: &Fields, group_by: &[String]) -> ReduceKey {
        ReduceKey(
            group_by
                .iter()
                .map(|field| match row.get(field) {
                    Some(value) => KeyPart::Present(value.clone()),
                    None => KeyPart::Missing,
                })
                .collect(),
        )
    }
}

/// Address of a materialized row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntryKey {
    /// Row `row` emitted by map function `map` for document `id`.
    Document { id: String, map: usize, row: usize },
    Reduce(ReduceKey),
}

/// One row of an index's current output.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializedEntry {
    pub key: EntryKey,
    pub fields: Fields,
    /// Ids of the documents whose map rows produced this entry.
    pub sources: BTreeSet<String>,
}

impl MaterializedEntry {
    /// Source document of a map-only row.
    pub fn document_id(&self) -> Option<&str> {
        match &self.key {
            EntryKey::Document { id, .. } => Some(id),
            EntryKey::Reduce(_) => None,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

/// Map or reduce failure isolated to the documents involved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexingError {
    pub document: Option<String>,
    pub stage: IndexingStage,
    pub message: String,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexingStage {
    Map,
    Reduce,
}

/// Read-only, point-in-time view of an index published by its worker.
#[derive(Debug, Clone, Default)]
pub struct IndexSnapshot {
    /// Last write sequence incorporated into this view.
    pub sequence: u64,
    pub entries: Arc<BTreeMap<EntryKey, Arc<MaterializedEntry>>>,
    pub postings: Arc<InvertedIndex>,
    /// Field names carried by at least one entry.
    pub fields: Arc<BTreeSet<String>>,
    pub map_entry_count: usize,
    pub errors: Arc<Vec<IndexingError>>,
}

impl IndexSnapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, key: &EntryKey) -> Option<&Arc<MaterializedEntry>> {
        self.entries.get(key)
    }
}

/// Management view of one index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStatus {
    pub name: String,
    pub last_indexed_sequence: u64,
    pub store_sequence: u64,
    pub is_stale: bool,
    pub entry_count: usize,
    pub map_entry_count: usize,
    /// Distinct terms and analyzed tokens of the analyzed fields.
    pub term_count: usize,
    pub token_count: usize,
    pub errors: Vec<IndexingError>,
}
