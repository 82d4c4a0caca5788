use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::sync::{Arc, Weak};
use chrono::Utc;
use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;
use crate::core::error::{Error, Result};
use crate::core::types::{collection_from_id, Document, Etag, Fields};
use crate::storage::wal::{LogEntry, LogOperation, WriteLog};
use crate::writer::batch::{BatchResult, WriteBatch, WriteOp, WriteOutcome};

/// A document mutation as seen by index maintenance.
#[derive(Debug, Clone)]
pub enum DocumentChange {
    Put(Arc<Document>),
    Deleted { id: String, collection: String },
}

impl DocumentChange {
    pub fn id(&self) -> &str {
        match self {
            DocumentChange::Put(doc) => &doc.id,
            DocumentChange::Deleted { id, .. } => id,
        }
    }

    pub fn collection(&self) -> &str {
        match self {
            DocumentChange::Put(doc) => &doc.collection,
            DocumentChange::Deleted { collection, .. } => collection,
        }
    }
}

/// Every change of one committed batch.
#[derive(Debug, Clone)]
pub struct CommitNotice {
    pub sequence: u64,
    pub changes: Arc<Vec<DocumentChange>>,
}

/// Receives commit notices in sequence order, while the commit still holds
/// the store's write lock. Implementations must not call back into the store.
pub trait CommitObserver: Send + Sync {
    fn on_commit(&self, notice: &CommitNotice);
}

#[derive(Default)]
struct StoreState {
    docs: BTreeMap<String, Arc<Document>>,
    sequence: u64,
    collection_counters: HashMap<String, u64>,
    identity_counters: HashMap<String, u64>,
    log: WriteLog,
}

/// Stored document handed back by [`DocumentStore::put`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutResult {
    pub id: String,
    pub etag: Etag,
    pub sequence: u64,
}

/// In-memory keyed document collection with optimistic concurrency.
///
/// Writes are serialized behind one lock. Each non-empty [`WriteBatch`] is
/// validated as a whole, applied atomically and assigned the next write
/// sequence number.
pub struct DocumentStore {
    state: RwLock<StoreState>,
    observers: RwLock<Vec<Weak<dyn CommitObserver>>>,
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore {
    pub fn new() -> Self {
        DocumentStore {
            state: RwLock::new(StoreState::default()),
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Rebuild a store by re-applying logged mutations in order.
    pub fn replay<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = LogEntry>,
    {
        let store = DocumentStore::new();
        {
            let mut state = store.state.write();
            for entry in entries {
                if entry.sequence < state.sequence {
                    return Err(Error::Corruption(format!(
                        "log entry for '{}' at sequence {} follows sequence {}",
                        entry.id, entry.sequence, state.sequence
                    )));
                }
                let current = state.docs.get(&entry.id).map(|d| d.etag);
                if current != entry.prior_etag {
                    return Err(Error::Corruption(format!(
                        "log entry for '{}' expects etag {:?}, store has {:?}",
                        entry.id, entry.prior_etag, current
                    )));
                }
                match &entry.operation {
                    LogOperation::Put { body, etag } => {
                        let doc = Document {
                            id: entry.id.clone(),
                            collection: entry.collection.clone(),
                            body: body.clone(),
                            etag: *etag,
                            last_modified: entry.timestamp,
                        };
                        state.docs.insert(entry.id.clone(), Arc::new(doc));
                    }
                    LogOperation::Delete => {
                        state.docs.remove(&entry.id);
                    }
                }
                state.sequence = entry.sequence;
                state.log.append(entry);
            }
            debug!(sequence = state.sequence, docs = state.docs.len(), "replayed write log");
        }
        Ok(store)
    }

    /// Register for commit notices. Dropped observers are pruned lazily.
    pub fn subscribe(&self, observer: Weak<dyn CommitObserver>) {
        self.observers.write().push(observer);
    }

    pub fn put(&self, id: &str, body: Fields, expected: Option<Etag>) -> Result<PutResult> {
        let op = WriteOp::Put {
            id: id.to_string(),
            collection: None,
            body,
            expected,
        };
        self.put_op(op)
    }

    /// Store into an explicit collection. An empty id is auto-generated.
    pub fn put_in(&self, collection: &str, id: &str, body: Fields) -> Result<PutResult> {
        let op = WriteOp::Put {
            id: id.to_string(),
            collection: Some(collection.to_string()),
            body,
            expected: None,
        };
        self.put_op(op)
    }

    fn put_op(&self, op: WriteOp) -> Result<PutResult> {
        let mut batch = WriteBatch::new();
        batch.push(op);
        let result = self.commit(batch)?;
        match result.outcomes.into_iter().next() {
            Some(WriteOutcome::Stored { id, etag, .. }) => Ok(PutResult {
                id,
                etag,
                sequence: result.sequence,
            }),
            _ => Err(Error::InvalidInput("put produced no stored document".to_string())),
        }
    }

    pub fn get(&self, id: &str) -> Result<Arc<Document>> {
        self.try_get(id).ok_or_else(|| Error::NotFound(id.to_string()))
    }

    pub fn try_get(&self, id: &str) -> Option<Arc<Document>> {
        self.state.read().docs.get(id).cloned()
    }

    pub fn delete(&self, id: &str, expected: Option<Etag>) -> Result<()> {
        let op = WriteOp::Delete {
            id: id.to_string(),
            expected,
        };
        let mut batch = WriteBatch::new();
        batch.push(op);
        self.commit(batch).map(|_| ())
    }

    /// Documents whose id starts with `prefix`, in id order.
    pub fn scan_by_prefix(&self, prefix: &str, skip: usize, take: usize) -> Vec<Arc<Document>> {
        let state = self.state.read();
        state
            .docs
            .range(prefix.to_string()..)
            .take_while(|(id, _)| id.starts_with(prefix))
            .skip(skip)
            .take(take)
            .map(|(_, doc)| doc.clone())
            .collect()
    }

    /// Reserve the next `<collection>/<n>` id that is not in use.
    pub fn generate_id(&self, collection: &str) -> String {
        let mut state = self.state.write();
        let StoreState { docs, collection_counters, .. } = &mut *state;
        next_free(collection_counters, collection, |n| format!("{}/{}", collection, n), |candidate| {
            docs.contains_key(candidate)
        })
    }

    pub fn current_sequence(&self) -> u64 {
        self.state.read().sequence
    }

    pub fn len(&self) -> usize {
        self.state.read().docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().docs.is_empty()
    }

    /// Copy of the write log.
    pub fn log(&self) -> Vec<LogEntry> {
        self.state.read().log.entries().to_vec()
    }

    pub fn write_log_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.state.read().log.write_to(writer)
    }

    /// Run `f` over the documents of the given collections at a sequence no
    /// commit can advance while `f` runs.
    pub fn with_consistent_view<R>(
        &self,
        collections: &[&str],
        f: impl FnOnce(u64, Vec<Arc<Document>>) -> R,
    ) -> R {
        let state = self.state.read();
        let docs = state
            .docs
            .values()
            .filter(|doc| collections.contains(&doc.collection.as_str()))
            .cloned()
            .collect();
        f(state.sequence, docs)
    }

    /// Validate and apply a batch atomically. Nothing is written when any op fails.
    pub fn commit(&self, batch: WriteBatch) -> Result<BatchResult> {
        let mut state = self.state.write();

        if batch.is_empty() {
            return Ok(BatchResult {
                sequence: state.sequence,
                outcomes: Vec::new(),
            });
        }

        // Resolve ids and check etags against the state as it evolves within the batch.
        let mut pending: HashMap<String, Option<Etag>> = HashMap::new();
        let mut staged_collection = state.collection_counters.clone();
        let mut staged_identity = state.identity_counters.clone();
        let mut resolved: Vec<(String, WriteOp)> = Vec::with_capacity(batch.len());

        for op in batch.ops {
            let id = match &op {
                WriteOp::Put { id, collection, .. } if id.is_empty() => {
                    match collection.as_deref().filter(|c| !c.is_empty()) {
                        Some(collection) => next_free(
                            &mut staged_collection,
                            collection,
                            |n| format!("{}/{}", collection, n),
                            |candidate| state.docs.contains_key(candidate) || pending.contains_key(candidate),
                        ),
                        // No collection to number within.
                        None => Uuid::new_v4().to_string(),
                    }
                }
                WriteOp::Put { id, .. } if id.ends_with('/') => {
                    next_free(&mut staged_identity, id, |n| format!("{}{}", id, n), |candidate| {
                        state.docs.contains_key(candidate) || pending.contains_key(candidate)
                    })
                }
                other => other.id().to_string(),
            };

            let current = match pending.get(&id) {
                Some(staged) => *staged,
                None => state.docs.get(&id).map(|d| d.etag),
            };

            match &op {
                WriteOp::Put { expected, .. } => {
                    if let Some(expected) = expected {
                        if current != Some(*expected) {
                            return Err(Error::ConcurrencyConflict {
                                id,
                                expected: *expected,
                                actual: current,
                            });
                        }
                    }
                    let etag = current.map(Etag::next).unwrap_or(Etag::INITIAL);
                    pending.insert(id.clone(), Some(etag));
                }
                WriteOp::Delete { expected, .. } => {
                    let Some(actual) = current else {
                        return Err(Error::NotFound(id));
                    };
                    if let Some(expected) = expected {
                        if actual != *expected {
                            return Err(Error::ConcurrencyConflict {
                                id,
                                expected: *expected,
                                actual: Some(actual),
                            });
                        }
                    }
                    pending.insert(id.clone(), None);
                }
            }
            resolved.push((id, op));
        }

        state.collection_counters = staged_collection;
        state.identity_counters = staged_identity;
        state.sequence += 1;
        let sequence = state.sequence;
        let now = Utc::now();

        let mut outcomes = Vec::with_capacity(resolved.len());
        let mut changes = Vec::with_capacity(resolved.len());

        for (id, op) in resolved {
            let prior = state.docs.get(&id).cloned();
            let prior_etag = prior.as_ref().map(|d| d.etag);

            match op {
                WriteOp::Put { id: requested_id, collection, body, .. } => {
                    let collection = collection
                        .filter(|c| !c.is_empty())
                        .or_else(|| prior.as_ref().map(|d| d.collection.clone()))
                        .unwrap_or_else(|| collection_from_id(&id).to_string());
                    let etag = prior_etag.map(Etag::next).unwrap_or(Etag::INITIAL);
                    let doc = Arc::new(Document {
                        id: id.clone(),
                        collection: collection.clone(),
                        body,
                        etag,
                        last_modified: now,
                    });

                    state.log.append(LogEntry {
                        sequence,
                        id: id.clone(),
                        collection,
                        prior_etag,
                        operation: LogOperation::Put {
                            body: doc.body.clone(),
                            etag,
                        },
                        timestamp: now,
                    });
                    state.docs.insert(id.clone(), doc.clone());
                    changes.push(DocumentChange::Put(doc));
                    outcomes.push(WriteOutcome::Stored { requested_id, id, etag });
                }
                WriteOp::Delete { .. } => {
                    let collection = prior
                        .as_ref()
                        .map(|d| d.collection.clone())
                        .unwrap_or_default();
                    state.docs.remove(&id);
                    state.log.append(LogEntry {
                        sequence,
                        id: id.clone(),
                        collection: collection.clone(),
                        prior_etag,
                        operation: LogOperation::Delete,
                        timestamp: now,
                    });
                    changes.push(DocumentChange::Deleted {
                        id: id.clone(),
                        collection,
                    });
                    outcomes.push(WriteOutcome::Deleted { id });
                }
            }
        }

        debug!(sequence, ops = outcomes.len(), "committed write batch");

        let notice = CommitNotice {
            sequence,
            changes: Arc::new(changes),
        };
        self.notify(&notice);
        drop(state);

        Ok(BatchResult { sequence, outcomes })
    }

    fn notify(&self, notice: &CommitNotice) {
        let mut observers = self.observers.write();
        observers.retain(|weak| match weak.upgrade() {
            Some(observer) => {
                observer.on_commit(notice);
                true
            }
            None => false,
        });
    }
}

fn next_free(
    counters: &mut HashMap<String, u64>,
    key: &str,
    format_id: impl Fn(u64) -> String,
    taken: impl Fn(&str) -> bool,
) -> String {
    let counter = counters.entry(key.to_string()).or_insert(0);
    loop {
        *counter += 1;
        let candidate = format_id(*counter);
        if !taken(&candidate) {
            return candidate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::fields;
    use parking_lot::Mutex;

    #[test]
    fn test_put_get_and_etag_bump() {
        let store = DocumentStore::new();
        let first = store.put("foo/1", fields! { "Data" => 1 }, None).unwrap();
        assert_eq!(first.etag, Etag(1));
        let second = store.put("foo/1", fields! { "Data" => 2 }, Some(Etag(1))).unwrap();
        assert_eq!(second.etag, Etag(2));
        assert_eq!(second.sequence, 2);

        let doc = store.get("foo/1").unwrap();
        assert_eq!(doc.collection, "foo");
        assert_eq!(doc.body["Data"], 2.into());
    }

    #[test]
    fn test_stale_etag_conflicts() {
        let store = DocumentStore::new();
        store.put("foo/1", fields! { "Data" => 1 }, None).unwrap();
        store.put("foo/1", fields! { "Data" => 2 }, None).unwrap();

        let err = store.put("foo/1", fields! { "Data" => 3 }, Some(Etag(1))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConcurrencyConflict);
        assert_eq!(store.get("foo/1").unwrap().body["Data"], 2.into());
        assert_eq!(store.current_sequence(), 2);
    }

    #[test]
    fn test_auto_ids_skip_taken_ones() {
        let store = DocumentStore::new();
        store.put("foo/2", fields! {}, None).unwrap();
        let a = store.put_in("foo", "", fields! {}).unwrap();
        let b = store.put_in("foo", "", fields! {}).unwrap();
        assert_eq!(a.id, "foo/1");
        assert_eq!(b.id, "foo/3");
    }

    #[test]
    fn test_identity_suffix_ids() {
        let store = DocumentStore::new();
        let batch = (0..3).fold(WriteBatch::new(), |batch, i| {
            batch.put("tenant/1/foo/", fields! { "N" => i })
        });
        let result = store.commit(batch).unwrap();
        assert_eq!(result.id_at(0), Some("tenant/1/foo/1"));
        assert_eq!(result.id_at(2), Some("tenant/1/foo/3"));
        assert_eq!(store.scan_by_prefix("tenant/1", 0, 10).len(), 3);
        assert_eq!(store.get("tenant/1/foo/2").unwrap().collection, "tenant");
    }

    #[test]
    fn test_failed_batch_writes_nothing() {
        let store = DocumentStore::new();
        let batch = WriteBatch::new()
            .put("a/1", fields! {})
            .delete("a/404");
        assert_eq!(store.commit(batch).unwrap_err().kind(), ErrorKind::NotFound);
        assert!(store.is_empty());
        assert_eq!(store.current_sequence(), 0);
    }

    #[test]
    fn test_scan_by_prefix_pages_in_id_order() {
        let store = DocumentStore::new();
        for id in ["b/2", "a/1", "b/1", "b/3", "c/1"] {
            store.put(id, fields! {}, None).unwrap();
        }
        let ids: Vec<String> = store
            .scan_by_prefix("b/", 1, 5)
            .iter()
            .map(|d| d.id.clone())
            .collect();
        assert_eq!(ids, vec!["b/2", "b/3"]);
    }

    #[test]
    fn test_delete_and_missing_delete() {
        let store = DocumentStore::new();
        store.put("a/1", fields! {}, None).unwrap();
        store.delete("a/1", Some(Etag(1))).unwrap();
        assert!(store.try_get("a/1").is_none());
        assert_eq!(store.delete("a/1", None).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_replay_restores_state() {
        let store = DocumentStore::new();
        store.put("a/1", fields! { "V" => 1 }, None).unwrap();
        store.put("a/1", fields! { "V" => 2 }, None).unwrap();
        store.put("a/2", fields! { "V" => 3 }, None).unwrap();
        store.delete("a/2", None).unwrap();

        let replayed = DocumentStore::replay(store.log()).unwrap();
        assert_eq!(replayed.current_sequence(), 4);
        assert_eq!(replayed.len(), 1);
        let doc = replayed.get("a/1").unwrap();
        assert_eq!(doc.etag, Etag(2));
        assert_eq!(doc.body["V"], 2.into());
    }

    struct Recorder(Mutex<Vec<u64>>);

    impl CommitObserver for Recorder {
        fn on_commit(&self, notice: &CommitNotice) {
            self.0.lock().push(notice.sequence);
        }
    }

    #[test]
    fn test_observers_see_commits_in_order() {
        let store = DocumentStore::new();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let weak: Weak<dyn CommitObserver> = Arc::downgrade(&recorder) as Weak<dyn CommitObserver>;
        store.subscribe(weak);

        store.put("a/1", fields! {}, None).unwrap();
        store.commit(WriteBatch::new()).unwrap();
        store.put("a/2", fields! {}, None).unwrap();
        assert_eq!(*recorder.0.lock(), vec![1, 2]);
    }
}
