use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use crossbeam::channel::{unbounded, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};
use crate::analysis::analyzer::AnalyzerRegistry;
use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::index::definition::IndexDefinition;
use crate::index::materialized::{IndexSnapshot, IndexStatus};
use crate::index::worker::{IndexWorker, WorkItem, WorkerSettings};
use crate::mvcc::controller::{SnapshotCell, StalenessMarker};
use crate::storage::document_store::{CommitNotice, CommitObserver, DocumentStore};

/// A registered index: its definition, its worker and what readers see.
pub struct IndexHandle {
    definition: Arc<IndexDefinition>,
    generation: u64,
    sender: Sender<WorkItem>,
    marker: Arc<StalenessMarker>,
    snapshots: Arc<SnapshotCell<IndexSnapshot>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl IndexHandle {
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &Arc<IndexDefinition> {
        &self.definition
    }

    /// Distinguishes this registration from earlier ones under the same name.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Latest published view. Never blocks on indexing.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.snapshots.load()
    }

    pub fn last_indexed_sequence(&self) -> u64 {
        self.marker.current()
    }

    /// Block until the index has incorporated `target`, then return a view
    /// at or after it.
    pub fn wait_for_sequence(&self, target: u64, timeout: Duration) -> Result<Arc<IndexSnapshot>> {
        let started = Instant::now();
        let reached = self.marker.wait_until(target, timeout);
        if reached < target {
            warn!(
                index = %self.definition.name,
                target,
                indexed = reached,
                waited_ms = started.elapsed().as_millis() as u64,
                "timed out waiting for non-stale index"
            );
            return Err(Error::StaleIndexTimeout {
                index: self.definition.name.clone(),
                target,
                indexed: reached,
                waited: timeout,
            });
        }
        Ok(self.snapshots.load())
    }

    fn stop(&self) {
        let _ = self.sender.send(WorkItem::Shutdown);
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                warn!(index = %self.definition.name, "index worker panicked");
            }
        }
    }
}

/// Keeps every registered index's materialized output in step with the
/// document store. Each index has its own worker thread; commits reach all
/// workers in sequence order.
pub struct IndexEngine {
    store: Arc<DocumentStore>,
    analyzers: Arc<AnalyzerRegistry>,
    settings: WorkerSettings,
    generations: AtomicU64,
    indexes: RwLock<BTreeMap<String, Arc<IndexHandle>>>,
}

impl IndexEngine {
    pub fn new(store: Arc<DocumentStore>, analyzers: Arc<AnalyzerRegistry>, config: &Config) -> Arc<Self> {
        let engine = Arc::new(IndexEngine {
            store: store.clone(),
            analyzers,
            settings: WorkerSettings {
                max_reduce_passes: config.max_reduce_passes,
                parallel_rebuild_threshold: config.parallel_rebuild_threshold,
                max_index_errors: config.max_index_errors,
            },
            generations: AtomicU64::new(0),
            indexes: RwLock::new(BTreeMap::new()),
        });
        let observer: Weak<dyn CommitObserver> = Arc::downgrade(&engine) as Weak<dyn CommitObserver>;
        store.subscribe(observer);
        engine
    }

    /// Register an index, replacing any index of the same name. The new index
    /// starts stale and catches up with the existing documents in the background.
    pub fn register(&self, definition: IndexDefinition) -> Result<Arc<IndexHandle>> {
        self.install(definition, true)
    }

    /// Existing index of that name, or a freshly registered one.
    pub fn get_or_register(&self, definition: IndexDefinition) -> Result<Arc<IndexHandle>> {
        self.install(definition, false)
    }

    fn install(&self, definition: IndexDefinition, replace: bool) -> Result<Arc<IndexHandle>> {
        let definition = Arc::new(definition);
        let name = definition.name.clone();
        let collections = definition.collections();

        // Holding the store's read lock keeps commits out until the handle is
        // subscribed, so the rebuild and later commits arrive in order.
        let (handle, replaced) = self.store.with_consistent_view(
            &collections,
            |sequence, documents| -> Result<(Arc<IndexHandle>, Option<Arc<IndexHandle>>)> {
            let mut indexes = self.indexes.write();
            if !replace {
                if let Some(existing) = indexes.get(&name) {
                    return Ok((existing.clone(), None));
                }
            }

            let handle = self.spawn(definition.clone())?;
            let _ = handle.sender.send(WorkItem::Rebuild { sequence, documents });
            let replaced = indexes.insert(name.clone(), handle.clone());
            info!(
                index = %name,
                sequence,
                map_reduce = definition.is_map_reduce(),
                replaced = replaced.is_some(),
                "registered index"
            );
            Ok((handle, replaced))
        })?;

        if let Some(old) = replaced {
            old.stop();
        }
        Ok(handle)
    }

    fn spawn(&self, definition: Arc<IndexDefinition>) -> Result<Arc<IndexHandle>> {
        let (sender, receiver) = unbounded();
        let marker = Arc::new(StalenessMarker::new());
        let snapshots = Arc::new(SnapshotCell::new(IndexSnapshot::default()));

        let worker = IndexWorker::new(
            definition.clone(),
            &self.analyzers,
            self.settings,
            marker.clone(),
            snapshots.clone(),
        );
        let join = thread::Builder::new()
            .name(format!("index:{}", definition.name))
            .spawn(move || worker.run(receiver))?;

        Ok(Arc::new(IndexHandle {
            definition,
            generation: self.generations.fetch_add(1, Ordering::Relaxed) + 1,
            sender,
            marker,
            snapshots,
            worker: Mutex::new(Some(join)),
        }))
    }

    pub fn handle(&self, name: &str) -> Result<Arc<IndexHandle>> {
        self.indexes
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::IndexNotFound(name.to_string()))
    }

    pub fn index_names(&self) -> Vec<String> {
        self.indexes.read().keys().cloned().collect()
    }

    /// Discard an index's output and rebuild it from the current documents.
    pub fn reset(&self, name: &str) -> Result<()> {
        let handle = self.handle(name)?;
        let collections = handle.definition.collections();
        self.store.with_consistent_view(&collections, |sequence, documents| {
            handle.marker.reset();
            let _ = handle.sender.send(WorkItem::Rebuild { sequence, documents });
            info!(index = %name, sequence, "reset index");
        });
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        let handle = self
            .indexes
            .write()
            .remove(name)
            .ok_or_else(|| Error::IndexNotFound(name.to_string()))?;
        handle.stop();
        info!(index = %name, "removed index");
        Ok(())
    }

    pub fn is_stale(&self, name: &str) -> Result<bool> {
        let handle = self.handle(name)?;
        Ok(handle.last_indexed_sequence() < self.store.current_sequence())
    }

    pub fn last_indexed_sequence(&self, name: &str) -> Result<u64> {
        Ok(self.handle(name)?.last_indexed_sequence())
    }

    pub fn snapshot(&self, name: &str) -> Result<Arc<IndexSnapshot>> {
        Ok(self.handle(name)?.snapshot())
    }

    pub fn wait_for_sequence(&self, name: &str, target: u64, timeout: Duration) -> Result<Arc<IndexSnapshot>> {
        self.handle(name)?.wait_for_sequence(target, timeout)
    }

    /// Wait until every index has caught up with the store's current sequence.
    pub fn wait_for_all(&self, timeout: Duration) -> Result<()> {
        let target = self.store.current_sequence();
        let deadline = Instant::now() + timeout;
        let handles: Vec<_> = self.indexes.read().values().cloned().collect();
        for handle in handles {
            let remaining = deadline.saturating_duration_since(Instant::now());
            handle.wait_for_sequence(target, remaining)?;
        }
        Ok(())
    }

    pub fn status(&self, name: &str) -> Result<IndexStatus> {
        let handle = self.handle(name)?;
        Ok(self.status_of(&handle))
    }

    pub fn statuses(&self) -> Vec<IndexStatus> {
        let handles: Vec<_> = self.indexes.read().values().cloned().collect();
        handles.iter().map(|handle| self.status_of(handle)).collect()
    }

    fn status_of(&self, handle: &IndexHandle) -> IndexStatus {
        let snapshot = handle.snapshot();
        let store_sequence = self.store.current_sequence();
        let indexed = handle.last_indexed_sequence();
        IndexStatus {
            name: handle.definition.name.clone(),
            last_indexed_sequence: indexed,
            store_sequence,
            is_stale: indexed < store_sequence,
            entry_count: snapshot.len(),
            map_entry_count: snapshot.map_entry_count,
            term_count: snapshot.postings.term_count(),
            token_count: snapshot.postings.token_count(),
            errors: snapshot.errors.as_ref().clone(),
        }
    }

    /// Stop every worker. Queued work is processed first.
    pub fn shutdown(&self) {
        let handles: Vec<_> = std::mem::take(&mut *self.indexes.write()).into_values().collect();
        for handle in &handles {
            handle.stop();
        }
        if !handles.is_empty() {
            debug!(indexes = handles.len(), "index engine shut down");
        }
    }
}

impl CommitObserver for IndexEngine {
    fn on_commit(&self, notice: &CommitNotice) {
        for handle in self.indexes.read().values() {
            // A closed channel means the index is being replaced or removed.
            let _ = handle.sender.send(WorkItem::Apply(notice.clone()));
        }
    }
}

impl Drop for IndexEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
