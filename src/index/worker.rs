use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use chrono::Utc;
use crossbeam::channel::Receiver;
use rayon::prelude::*;
use tracing::{debug, info, warn};
use crate::analysis::analyzer::{Analyzer, AnalyzerRegistry};
use crate::analysis::token::Token;
use crate::core::error::MapError;
use crate::core::types::{Document, Fields, Value};
use crate::index::definition::{guarded, IndexDefinition, ReduceScope, ReduceStage};
use crate::index::inverted::InvertedIndex;
use crate::index::materialized::{
    EntryKey, IndexSnapshot, IndexingError, IndexingStage, MaterializedEntry, ReduceKey,
};
use crate::mvcc::controller::{SnapshotCell, StalenessMarker};
use crate::storage::document_store::{CommitNotice, DocumentChange};

pub(crate) enum WorkItem {
    Apply(CommitNotice),
    /// Discard all state and re-map `documents`, the index's source documents at `sequence`.
    Rebuild {
        sequence: u64,
        documents: Vec<Arc<Document>>,
    },
    Shutdown,
}

/// Tuning knobs copied from the database config.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WorkerSettings {
    pub max_reduce_passes: usize,
    pub parallel_rebuild_threshold: usize,
    pub max_index_errors: usize,
}

/// Map rows of one document, tagged with the index of the emitting map function.
type MapRows = Vec<(usize, Fields)>;

#[derive(Default)]
struct IndexState {
    map_entries: BTreeMap<String, MapRows>,
    map_entry_count: usize,
    contributors: BTreeMap<ReduceKey, BTreeSet<String>>,
    entries: Arc<BTreeMap<EntryKey, Arc<MaterializedEntry>>>,
    postings: Arc<InvertedIndex>,
    field_usage: BTreeMap<String, usize>,
    errors: VecDeque<IndexingError>,
}

/// Owns one index's materialized state. Runs on a dedicated thread and is
/// the only writer of that state.
pub(crate) struct IndexWorker {
    definition: Arc<IndexDefinition>,
    analyzers: BTreeMap<String, Arc<Analyzer>>,
    settings: WorkerSettings,
    state: IndexState,
    marker: Arc<StalenessMarker>,
    snapshots: Arc<SnapshotCell<IndexSnapshot>>,
}

impl IndexWorker {
    pub fn new(
        definition: Arc<IndexDefinition>,
        registry: &AnalyzerRegistry,
        settings: WorkerSettings,
        marker: Arc<StalenessMarker>,
        snapshots: Arc<SnapshotCell<IndexSnapshot>>,
    ) -> Self {
        let analyzers = definition
            .schema
            .analyzed_fields()
            .map(|(field, options)| {
                (field.to_string(), registry.get_or_default(options.analyzer.as_deref()))
            })
            .collect();

        IndexWorker {
            definition,
            analyzers,
            settings,
            state: IndexState::default(),
            marker,
            snapshots,
        }
    }

    /// Drain work until shutdown or until every sender is gone. Items queued
    /// together are applied before a single snapshot is published.
    pub fn run(mut self, receiver: Receiver<WorkItem>) {
        while let Ok(item) = receiver.recv() {
            let mut pending = vec![item];
            pending.extend(receiver.try_iter());

            let mut published_up_to = None;
            let mut shutdown = false;
            for item in pending {
                match item {
                    WorkItem::Apply(notice) => {
                        self.apply(&notice);
                        published_up_to = Some(notice.sequence);
                    }
                    WorkItem::Rebuild { sequence, documents } => {
                        self.rebuild(sequence, documents);
                        published_up_to = Some(sequence);
                    }
                    WorkItem::Shutdown => {
                        shutdown = true;
                        break;
                    }
                }
            }

            if let Some(sequence) = published_up_to {
                self.publish(sequence);
            }
            if shutdown {
                break;
            }
        }
        debug!(index = %self.definition.name, "index worker stopped");
    }

    fn apply(&mut self, notice: &CommitNotice) {
        let mut touched = BTreeSet::new();
        let mut changes = 0usize;

        for change in notice.changes.iter() {
            let relevant = self.definition.reads_collection(change.collection())
                || self.state.map_entries.contains_key(change.id());
            if !relevant {
                continue;
            }
            changes += 1;

            let rows = match change {
                DocumentChange::Put(doc) => match map_document(&self.definition, doc) {
                    Ok(rows) => rows,
                    Err(err) => {
                        self.record_error(Some(&doc.id), IndexingStage::Map, &err, notice.sequence);
                        Vec::new()
                    }
                },
                DocumentChange::Deleted { .. } => Vec::new(),
            };
            self.replace_rows(change.id(), rows, &mut touched);
        }

        if changes == 0 {
            return;
        }
        self.recompute_reduce(touched, notice.sequence);
        debug!(index = %self.definition.name, sequence = notice.sequence, changes, "applied commit");
    }

    fn rebuild(&mut self, sequence: u64, documents: Vec<Arc<Document>>) {
        self.state = IndexState::default();

        let definition = &self.definition;
        let mapped: Vec<(String, Result<MapRows, MapError>)> =
            if documents.len() >= self.settings.parallel_rebuild_threshold {
                documents
                    .par_iter()
                    .map(|doc| (doc.id.clone(), map_document(definition, doc)))
                    .collect()
            } else {
                documents
                    .iter()
                    .map(|doc| (doc.id.clone(), map_document(definition, doc)))
                    .collect()
            };

        let mut touched = BTreeSet::new();
        for (id, result) in mapped {
            match result {
                Ok(rows) => self.replace_rows(&id, rows, &mut touched),
                Err(err) => self.record_error(Some(&id), IndexingStage::Map, &err, sequence),
            }
        }
        self.recompute_reduce(touched, sequence);

        info!(
            index = %self.definition.name,
            sequence,
            documents = documents.len(),
            entries = self.state.entries.len(),
            "rebuilt index"
        );
    }

    /// Swap a document's map rows. Map-only indexes update their entries
    /// directly; reduce indexes collect the affected reduce keys.
    fn replace_rows(&mut self, id: &str, rows: MapRows, touched: &mut BTreeSet<ReduceKey>) {
        let old = self.state.map_entries.remove(id).unwrap_or_default();
        self.state.map_entry_count = self.state.map_entry_count - old.len() + rows.len();

        match self.definition.reduce.as_ref().map(|r| r.group_by.clone()) {
            None => {
                for key in document_keys(id, &old) {
                    self.remove_entry(&key);
                }
                for (key, (_, row)) in document_keys(id, &rows).into_iter().zip(rows.iter()) {
                    self.insert_entry(MaterializedEntry {
                        key,
                        fields: row.clone(),
                        sources: BTreeSet::from([id.to_string()]),
                    });
                }
            }
            Some(group_by) => {
                for (_, row) in &old {
                    let key = ReduceKey::of(row, &group_by);
                    if let Some(ids) = self.state.contributors.get_mut(&key) {
                        ids.remove(id);
                        if ids.is_empty() {
                            self.state.contributors.remove(&key);
                        }
                    }
                    touched.insert(key);
                }
                for (_, row) in &rows {
                    let key = ReduceKey::of(row, &group_by);
                    self.state.contributors.entry(key.clone()).or_default().insert(id.to_string());
                    touched.insert(key);
                }
            }
        }

        if !rows.is_empty() {
            self.state.map_entries.insert(id.to_string(), rows);
        }
    }

    fn recompute_reduce(&mut self, touched: BTreeSet<ReduceKey>, sequence: u64) {
        let Some(stage) = self.definition.reduce.clone() else {
            return;
        };
        if touched.is_empty() {
            return;
        }

        match stage.scope {
            ReduceScope::Group => {
                for key in touched {
                    let rows = self.rows_for_key(&key, &stage.group_by);
                    let entry_key = EntryKey::Reduce(key.clone());
                    if rows.is_empty() {
                        self.remove_entry(&entry_key);
                        continue;
                    }
                    match self.fold(&stage, &key, rows, true) {
                        Ok(Some(fields)) => self.insert_reduced(key, fields),
                        Ok(None) => self.remove_entry(&entry_key),
                        Err(err) => {
                            self.record_error(None, IndexingStage::Reduce, &err, sequence);
                            self.remove_entry(&entry_key);
                        }
                    }
                }
            }
            ReduceScope::AllEntries => self.recompute_all(&stage, sequence),
        }
    }

    /// Replace the whole reduce output from every current map entry.
    fn recompute_all(&mut self, stage: &ReduceStage, sequence: u64) {
        let all: Vec<Fields> = self
            .state
            .map_entries
            .values()
            .flat_map(|rows| rows.iter().map(|(_, row)| row.clone()))
            .collect();

        let output = match guarded(|| (stage.reduce)(&all)) {
            Ok(output) => output,
            Err(err) => {
                // Previous output keeps serving until a batch reduces cleanly.
                self.record_error(None, IndexingStage::Reduce, &err, sequence);
                return;
            }
        };

        let mut groups: BTreeMap<ReduceKey, Vec<Fields>> = BTreeMap::new();
        for row in output {
            groups.entry(ReduceKey::of(&row, &stage.group_by)).or_default().push(row);
        }

        let stale: Vec<EntryKey> = self
            .state
            .entries
            .keys()
            .filter(|key| match key {
                EntryKey::Reduce(reduce_key) => !groups.contains_key(reduce_key),
                EntryKey::Document { .. } => true,
            })
            .cloned()
            .collect();
        for key in stale {
            self.remove_entry(&key);
        }

        for (key, rows) in groups {
            match self.fold(stage, &key, rows, false) {
                Ok(Some(fields)) => self.insert_reduced(key, fields),
                Ok(None) => self.remove_entry(&EntryKey::Reduce(key)),
                Err(err) => {
                    self.record_error(None, IndexingStage::Reduce, &err, sequence);
                    self.remove_entry(&EntryKey::Reduce(key));
                }
            }
        }
    }

    /// Reduce `rows` of one key until a single row remains. Output rows that
    /// still share the key are fed back as input, up to the configured passes.
    fn fold(
        &self,
        stage: &ReduceStage,
        key: &ReduceKey,
        rows: Vec<Fields>,
        reduce_first: bool,
    ) -> Result<Option<Fields>, MapError> {
        let mut current = rows;
        if !reduce_first && current.len() == 1 {
            return Ok(current.pop());
        }

        for _ in 0..self.settings.max_reduce_passes.max(1) {
            let mut output = guarded(|| (stage.reduce)(&current))?;
            if let Some(row) = output.iter().find(|row| ReduceKey::of(row, &stage.group_by) != *key) {
                return Err(MapError::failed(format!(
                    "reduce output {:?} does not carry the key it was given ({:?})",
                    row, key
                )));
            }
            match output.len() {
                0 => return Ok(None),
                1 => return Ok(output.pop()),
                _ => current = output,
            }
        }

        Err(MapError::failed(format!(
            "reduce of key {:?} still produced several rows after {} passes",
            key, self.settings.max_reduce_passes
        )))
    }

    fn rows_for_key(&self, key: &ReduceKey, group_by: &[String]) -> Vec<Fields> {
        let Some(ids) = self.state.contributors.get(key) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| self.state.map_entries.get(id))
            .flat_map(|rows| rows.iter())
            .filter(|(_, row)| ReduceKey::of(row, group_by) == *key)
            .map(|(_, row)| row.clone())
            .collect()
    }

    fn insert_reduced(&mut self, key: ReduceKey, fields: Fields) {
        let sources = self.state.contributors.get(&key).cloned().unwrap_or_default();
        self.insert_entry(MaterializedEntry {
            key: EntryKey::Reduce(key),
            fields,
            sources,
        });
    }

    fn insert_entry(&mut self, entry: MaterializedEntry) {
        self.remove_entry(&entry.key);

        for field in entry.fields.keys() {
            *self.state.field_usage.entry(field.clone()).or_insert(0) += 1;
        }

        if !self.analyzers.is_empty() {
            let postings = Arc::make_mut(&mut self.state.postings);
            for (field, analyzer) in &self.analyzers {
                if let Some(value) = entry.fields.get(field) {
                    let tokens = analyze_value(analyzer, value);
                    postings.add_field(&entry.key, field, &tokens);
                }
            }
        }

        Arc::make_mut(&mut self.state.entries).insert(entry.key.clone(), Arc::new(entry));
    }

    fn remove_entry(&mut self, key: &EntryKey) {
        if !self.state.entries.contains_key(key) {
            return;
        }
        if let Some(old) = Arc::make_mut(&mut self.state.entries).remove(key) {
            for field in old.fields.keys() {
                if let Some(count) = self.state.field_usage.get_mut(field) {
                    *count -= 1;
                    if *count == 0 {
                        self.state.field_usage.remove(field);
                    }
                }
            }
        }
        if !self.analyzers.is_empty() {
            Arc::make_mut(&mut self.state.postings).remove_entry(key);
        }
    }

    fn record_error(&mut self, document: Option<&str>, stage: IndexingStage, err: &MapError, sequence: u64) {
        warn!(
            index = %self.definition.name,
            document = document.unwrap_or("-"),
            stage = ?stage,
            error = %err,
            "indexing failure isolated"
        );
        self.state.errors.push_back(IndexingError {
            document: document.map(str::to_string),
            stage,
            message: err.to_string(),
            sequence,
            timestamp: Utc::now(),
        });
        while self.state.errors.len() > self.settings.max_index_errors {
            self.state.errors.pop_front();
        }
    }

    fn publish(&self, sequence: u64) {
        self.snapshots.publish(IndexSnapshot {
            sequence,
            entries: self.state.entries.clone(),
            postings: self.state.postings.clone(),
            fields: Arc::new(self.state.field_usage.keys().cloned().collect()),
            map_entry_count: self.state.map_entry_count,
            errors: Arc::new(self.state.errors.iter().cloned().collect()),
        });
        self.marker.advance(sequence);
    }
}

/// Run every map function reading the document's collection.
fn map_document(definition: &IndexDefinition, doc: &Document) -> Result<MapRows, MapError> {
    let mut rows = Vec::new();
    for (ordinal, stage) in definition.maps.iter().enumerate() {
        if stage.collection != doc.collection {
            continue;
        }
        let emitted = guarded(|| (stage.map)(doc))?;
        rows.extend(emitted.into_iter().map(|row| (ordinal, row)));
    }
    Ok(rows)
}

/// Entry keys of a document's map rows, numbered per map function.
fn document_keys(id: &str, rows: &MapRows) -> Vec<EntryKey> {
    let mut per_map: BTreeMap<usize, usize> = BTreeMap::new();
    rows.iter()
        .map(|(map, _)| {
            let row = per_map.entry(*map).or_insert(0);
            let key = EntryKey::Document {
                id: id.to_string(),
                map: *map,
                row: *row,
            };
            *row += 1;
            key
        })
        .collect()
}

/// Tokens of a field value; every element of a list is analyzed.
pub(crate) fn analyze_value(analyzer: &Analyzer, value: &Value) -> Vec<Token> {
    let mut tokens = Vec::new();
    for element in value.elements() {
        match element {
            Value::Null | Value::Object(_) | Value::List(_) => {}
            other => tokens.extend(analyzer.analyze(&other.to_string())),
        }
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields;
    use crate::index::inverted::Term;
    use crate::index::aggregate;
    use crate::schema::schema::FieldOptions;
    use proptest::prelude::*;

    fn settings() -> WorkerSettings {
        WorkerSettings {
            max_reduce_passes: 4,
            parallel_rebuild_threshold: 2,
            max_index_errors: 3,
        }
    }

    fn worker(definition: IndexDefinition) -> IndexWorker {
        IndexWorker::new(
            Arc::new(definition),
            &AnalyzerRegistry::new(),
            settings(),
            Arc::new(StalenessMarker::new()),
            Arc::new(SnapshotCell::new(IndexSnapshot::default())),
        )
    }

    fn doc(id: &str, body: Fields) -> Arc<Document> {
        Arc::new(Document {
            id: id.to_string(),
            collection: crate::core::types::collection_from_id(id).to_string(),
            body,
            etag: crate::core::types::Etag::INITIAL,
            last_modified: Utc::now(),
        })
    }

    fn notice(sequence: u64, changes: Vec<DocumentChange>) -> CommitNotice {
        CommitNotice {
            sequence,
            changes: Arc::new(changes),
        }
    }

    fn fan_out() -> IndexDefinition {
        IndexDefinition::builder("Orders/Lines")
            .map("orders", |doc| {
                Ok(doc
                    .get_field("Lines")
                    .and_then(Value::as_list)
                    .unwrap_or(&[])
                    .iter()
                    .map(|line| fields! { "Qty" => line.clone() })
                    .collect())
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_map_only_fan_out_and_delete() {
        let mut worker = worker(fan_out());
        worker.apply(&notice(1, vec![
            DocumentChange::Put(doc("orders/1", fields! { "Lines" => vec![1, 2, 3] })),
            DocumentChange::Put(doc("orders/2", fields! { "Lines" => vec![4] })),
        ]));
        assert_eq!(worker.state.entries.len(), 4);

        worker.apply(&notice(2, vec![DocumentChange::Put(doc("orders/1", fields! { "Lines" => vec![7] }))]));
        assert_eq!(worker.state.entries.len(), 2);

        worker.apply(&notice(3, vec![DocumentChange::Deleted {
            id: "orders/2".into(),
            collection: "orders".into(),
        }]));
        assert_eq!(worker.state.entries.len(), 1);
        assert_eq!(worker.state.map_entry_count, 1);
    }

    #[test]
    fn test_map_failure_is_isolated() {
        let definition = IndexDefinition::builder("Fragile")
            .map("things", |doc| {
                if doc.get_field("Bad").is_some() {
                    panic!("cannot map {}", doc.id);
                }
                Ok(vec![doc.body.clone()])
            })
            .build()
            .unwrap();
        let mut worker = worker(definition);
        worker.apply(&notice(1, vec![
            DocumentChange::Put(doc("things/1", fields! { "Ok" => true })),
            DocumentChange::Put(doc("things/2", fields! { "Bad" => true })),
        ]));
        worker.publish(1);

        let snapshot = worker.snapshots.load();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.errors.len(), 1);
        assert_eq!(snapshot.errors[0].document.as_deref(), Some("things/2"));
        assert_eq!(worker.marker.current(), 1);
    }

    #[test]
    fn test_multi_map_reduce_fills_parent_name() {
        let definition = IndexDefinition::builder("Users/PostCount")
            .map("users", |doc| {
                Ok(vec![fields! {
                    "UserId" => doc.id.clone(),
                    "UserName" => doc.body.get("Name").cloned().unwrap_or(Value::Null),
                    "PostCount" => 0,
                }])
            })
            .map("posts", |doc| {
                Ok(vec![fields! {
                    "UserId" => doc.body.get("UserId").cloned().unwrap_or(Value::Null),
                    "UserName" => Value::Null,
                    "PostCount" => 1,
                }])
            })
            .reduce(&["UserId"], |rows| {
                Ok(vec![fields! {
                    "UserId" => rows[0]["UserId"].clone(),
                    "UserName" => aggregate::first_non_null(rows, "UserName"),
                    "PostCount" => aggregate::sum(rows, "PostCount"),
                }])
            })
            .build()
            .unwrap();
        let mut worker = worker(definition);
        worker.apply(&notice(1, vec![
            DocumentChange::Put(doc("users/1", fields! { "Name" => "P1" })),
            DocumentChange::Put(doc("users/2", fields! { "Name" => "P2" })),
            DocumentChange::Put(doc("posts/1", fields! { "UserId" => "users/1" })),
            DocumentChange::Put(doc("posts/2", fields! { "UserId" => "users/1" })),
        ]));

        let key = EntryKey::Reduce(ReduceKey::of(&fields! { "UserId" => "users/1" }, &["UserId".to_string()]));
        let entry = &worker.state.entries[&key];
        assert_eq!(entry.fields["PostCount"], Value::from(2));
        assert_eq!(entry.fields["UserName"], Value::from("P1"));
        assert_eq!(entry.sources.len(), 3);

        worker.apply(&notice(2, vec![DocumentChange::Deleted {
            id: "posts/2".into(),
            collection: "posts".into(),
        }]));
        assert_eq!(worker.state.entries[&key].fields["PostCount"], Value::from(1));
        assert_eq!(worker.state.entries.len(), 2);
    }

    #[test]
    fn test_reduce_that_changes_key_is_an_error() {
        let definition = IndexDefinition::builder("Broken")
            .map("things", |doc| Ok(vec![fields! { "K" => doc.id.clone() }]))
            .reduce(&["K"], |_| Ok(vec![fields! { "K" => "other" }]))
            .build()
            .unwrap();
        let mut worker = worker(definition);
        worker.apply(&notice(1, vec![DocumentChange::Put(doc("things/1", fields! {}))]));
        assert!(worker.state.entries.is_empty());
        assert_eq!(worker.state.errors.len(), 1);
        assert_eq!(worker.state.errors[0].stage, IndexingStage::Reduce);
    }

    #[test]
    fn test_unrelated_collection_is_ignored() {
        let mut worker = worker(fan_out());
        worker.apply(&notice(1, vec![DocumentChange::Put(doc("users/1", fields! { "Lines" => vec![1] }))]));
        assert!(worker.state.entries.is_empty());
    }

    #[test]
    fn test_analyzed_field_postings_follow_entries() {
        let definition = IndexDefinition::builder("Plants/Keyword")
            .map("plants", |doc| {
                Ok(vec![fields! {
                    "Keyword" => vec![
                        doc.body.get("Name").cloned().unwrap_or(Value::Null),
                        doc.body.get("Gardner").cloned().unwrap_or(Value::Null),
                    ],
                }])
            })
            .field("Keyword", FieldOptions::analyzed())
            .build()
            .unwrap();
        let mut worker = worker(definition);
        worker.apply(&notice(1, vec![DocumentChange::Put(doc(
            "plants/1",
            fields! { "Name" => "Red Rose", "Gardner" => "Bill" },
        ))]));
        let bill = worker.state.postings.search_term(&Term::new("Keyword", "bill"));
        assert_eq!(bill.map(|list| list.len()), Some(1));

        worker.apply(&notice(2, vec![DocumentChange::Deleted {
            id: "plants/1".into(),
            collection: "plants".into(),
        }]));
        assert_eq!(worker.state.postings.term_count(), 0);
    }

    #[test]
    fn test_error_log_is_capped() {
        let definition = IndexDefinition::builder("AlwaysFails")
            .map("things", |_| Err(MapError::failed("nope")))
            .build()
            .unwrap();
        let mut worker = worker(definition);
        let changes = (0..5)
            .map(|i| DocumentChange::Put(doc(&format!("things/{}", i), fields! {})))
            .collect();
        worker.apply(&notice(1, changes));
        assert_eq!(worker.state.errors.len(), 3);
        assert_eq!(worker.state.errors[0].document.as_deref(), Some("things/2"));
    }

    proptest! {
        #[test]
        fn fan_out_rows_match_emitted_counts(counts in proptest::collection::vec(0usize..6, 1..12)) {
            let mut worker = worker(fan_out());
            let documents: Vec<Arc<Document>> = counts
                .iter()
                .enumerate()
                .map(|(i, n)| doc(&format!("orders/{}", i), fields! { "Lines" => vec![1; *n] }))
                .collect();
            worker.rebuild(1, documents);
            prop_assert_eq!(worker.state.entries.len(), counts.iter().sum::<usize>());

            worker.apply(&notice(2, vec![DocumentChange::Deleted {
                id: "orders/0".into(),
                collection: "orders".into(),
            }]));
            prop_assert_eq!(worker.state.entries.len(), counts[1..].iter().sum::<usize>());
        }
    }
}
