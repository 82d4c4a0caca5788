use std::io::Write;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::info;
use crate::analysis::analyzer::{Analyzer, AnalyzerRegistry};
use crate::core::config::Config;
use crate::core::error::Result;
use crate::core::session::{Session, SessionOptions};
use crate::core::stats::{DatabaseStats, HealthCheck, HealthCheckResult, HealthStatus};
use crate::core::types::{Document, Etag, Fields};
use crate::index::definition::IndexDefinition;
use crate::index::engine::IndexEngine;
use crate::index::materialized::IndexStatus;
use crate::query::cache::{CacheStats, QueryCache};
use crate::query::types::QueryRequest;
use crate::search::executor::QueryExecutor;
use crate::search::results::QueryResults;
use crate::storage::document_store::{DocumentStore, PutResult};
use crate::storage::wal::LogEntry;
use crate::writer::batch::{BatchResult, WriteBatch};

/// Embedded document database: a document store, the indexes kept over it
/// and the query path that reads them.
///
/// Writes return as soon as the store has applied them; indexes catch up on
/// their own threads.
pub struct Database {
    config: Config,
    store: Arc<DocumentStore>,
    analyzers: Arc<AnalyzerRegistry>,
    engine: Arc<IndexEngine>,
    cache: Option<QueryCache>,
    started: Instant,
    start_time: SystemTime,
}

impl Database {
    pub fn open(config: Config) -> Result<Self> {
        Self::with_store(config, DocumentStore::new())
    }

    /// Rebuild the store from a write log. Indexes registered afterwards are
    /// built from the restored documents.
    pub fn restore<I>(config: Config, entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = LogEntry>,
    {
        Self::with_store(config, DocumentStore::replay(entries)?)
    }

    fn with_store(config: Config, store: DocumentStore) -> Result<Self> {
        let store = Arc::new(store);
        let analyzers = Arc::new(AnalyzerRegistry::new());
        let engine = IndexEngine::new(store.clone(), analyzers.clone(), &config);
        let cache = NonZeroUsize::new(config.query_cache_size).map(QueryCache::new);

        info!(
            documents = store.len(),
            sequence = store.current_sequence(),
            cache = config.query_cache_size,
            "database opened"
        );

        Ok(Database {
            config,
            store,
            analyzers,
            engine,
            cache,
            started: Instant::now(),
            start_time: SystemTime::now(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    pub fn engine(&self) -> &Arc<IndexEngine> {
        &self.engine
    }

    /// Make an analyzer available to index fields by name.
    pub fn register_analyzer(&self, analyzer: Analyzer) {
        self.analyzers.register(analyzer);
    }

    // Documents

    pub fn put(&self, id: &str, body: Fields) -> Result<PutResult> {
        self.store.put(id, body, None)
    }

    pub fn put_expecting(&self, id: &str, body: Fields, expected: Etag) -> Result<PutResult> {
        self.store.put(id, body, Some(expected))
    }

    pub fn put_in(&self, collection: &str, id: &str, body: Fields) -> Result<PutResult> {
        self.store.put_in(collection, id, body)
    }

    pub fn get(&self, id: &str) -> Result<Arc<Document>> {
        self.store.get(id)
    }

    pub fn try_get(&self, id: &str) -> Option<Arc<Document>> {
        self.store.try_get(id)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        self.store.delete(id, None)
    }

    pub fn commit(&self, batch: WriteBatch) -> Result<BatchResult> {
        self.store.commit(batch)
    }

    pub fn scan_by_prefix(&self, prefix: &str, skip: usize, take: usize) -> Vec<Arc<Document>> {
        self.store.scan_by_prefix(prefix, skip, take)
    }

    pub fn generate_id(&self, collection: &str) -> String {
        self.store.generate_id(collection)
    }

    pub fn current_sequence(&self) -> u64 {
        self.store.current_sequence()
    }

    pub fn document_count(&self) -> usize {
        self.store.len()
    }

    pub fn write_log_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.store.write_log_to(writer)
    }

    // Indexes

    /// Register (or replace) an index. It starts stale and indexes the
    /// existing documents in the background.
    pub fn register_index(&self, definition: IndexDefinition) -> Result<()> {
        self.engine.register(definition)?;
        Ok(())
    }

    pub fn remove_index(&self, name: &str) -> Result<()> {
        self.engine.remove(name)
    }

    pub fn reset_index(&self, name: &str) -> Result<()> {
        self.engine.reset(name)
    }

    pub fn index_names(&self) -> Vec<String> {
        self.engine.index_names()
    }

    pub fn is_stale(&self, name: &str) -> Result<bool> {
        self.engine.is_stale(name)
    }

    pub fn last_indexed_sequence(&self, name: &str) -> Result<u64> {
        self.engine.last_indexed_sequence(name)
    }

    pub fn index_status(&self, name: &str) -> Result<IndexStatus> {
        self.engine.status(name)
    }

    pub fn index_statuses(&self) -> Vec<IndexStatus> {
        self.engine.statuses()
    }

    /// Block until every index has caught up with the latest commit.
    pub fn wait_for_indexing(&self, timeout: Duration) -> Result<()> {
        self.engine.wait_for_all(timeout)
    }

    // Queries

    pub fn query(&self, index: &str, request: QueryRequest) -> Result<QueryResults> {
        let handle = self.engine.handle(index)?;
        self.executor().execute(&handle, &request)
    }

    /// Query the automatic index of `collection`, creating it on first use.
    pub fn query_collection(&self, collection: &str, request: QueryRequest) -> Result<QueryResults> {
        let definition = IndexDefinition::auto(collection, &self.config.identity_property);
        let handle = self.engine.get_or_register(definition)?;
        self.executor().execute(&handle, &request)
    }

    fn executor(&self) -> QueryExecutor<'_> {
        QueryExecutor::new(&self.store, &self.analyzers, &self.config).with_cache(self.cache.as_ref())
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(QueryCache::stats)
    }

    // Sessions

    pub fn open_session(&self) -> Session<'_> {
        self.open_session_with(SessionOptions::default())
    }

    pub fn open_session_with(&self, options: SessionOptions) -> Session<'_> {
        Session::new(self, options)
    }

    // Monitoring

    pub fn stats(&self) -> DatabaseStats {
        let statuses = self.engine.statuses();
        DatabaseStats {
            uptime_secs: self.started.elapsed().as_secs(),
            start_time: self.start_time,
            total_documents: self.store.len(),
            store_sequence: self.store.current_sequence(),
            log_entries: self.store.log().len(),
            index_count: statuses.len(),
            stale_indexes: statuses.iter().filter(|s| s.is_stale).count(),
            indexing_errors: statuses.iter().map(|s| s.errors.len()).sum(),
            cache_stats: self.cache_stats(),
        }
    }

    /// One check per index; indexes with recorded failures are degraded.
    pub fn health_check(&self) -> HealthCheckResult {
        let checks = self
            .engine
            .index_names()
            .into_iter()
            .filter_map(|name| {
                let started = Instant::now();
                let status = self.engine.status(&name).ok()?;
                let (health, message) = if status.errors.is_empty() {
                    (HealthStatus::Healthy, None)
                } else {
                    let message = format!("{} indexing errors", status.errors.len());
                    (HealthStatus::Degraded(message.clone()), Some(message))
                };
                Some(HealthCheck {
                    name: format!("index:{}", name),
                    status: health,
                    message,
                    latency_ms: started.elapsed().as_millis() as u64,
                })
            })
            .collect();

        HealthCheckResult::from_checks(checks)
    }

    /// Stop the index workers. Queries still read the last published output.
    pub fn shutdown(&self) {
        self.engine.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::{ErrorKind, MapError};
    use crate::fields;
    use crate::query::ast::Query;

    #[test]
    fn test_query_collection_uses_auto_index() {
        let db = Database::open(Config::default()).unwrap();
        db.put_in("users", "", fields! { "Name" => "Bob" }).unwrap();
        db.put_in("users", "", fields! { "Name" => "Bill" }).unwrap();

        let results = db
            .query_collection("users", QueryRequest::new().filter(Query::equals("Name", "Bob")).wait_for_non_stale())
            .unwrap();
        assert_eq!(results.ids(), vec!["users/1"]);
        assert!(db.index_names().contains(&"Auto/users".to_string()));
        assert!(!results.stats.is_stale);
    }

    #[test]
    fn test_health_reports_failing_index() {
        let db = Database::open(Config::default()).unwrap();
        db.put("users/1", fields! { "Name" => "Bob" }).unwrap();
        db.register_index(
            IndexDefinition::builder("Users/Broken")
                .map("users", |_| Err(MapError::failed("boom")))
                .build()
                .unwrap(),
        )
        .unwrap();
        db.wait_for_indexing(Duration::from_secs(5)).unwrap();

        let health = db.health_check();
        assert!(!health.status.is_healthy());
        assert_eq!(db.stats().indexing_errors, 1);
        assert_eq!(db.index_status("Users/Broken").unwrap().entry_count, 0);
    }

    #[test]
    fn test_restore_from_log() {
        let db = Database::open(Config::default()).unwrap();
        db.put("users/1", fields! { "Name" => "Bob" }).unwrap();
        db.put("users/1", fields! { "Name" => "Robert" }).unwrap();
        db.delete("users/1").unwrap();
        db.put("users/2", fields! { "Name" => "Bill" }).unwrap();

        let restored = Database::restore(Config::default(), db.store().log()).unwrap();
        assert_eq!(restored.current_sequence(), db.current_sequence());
        assert!(restored.try_get("users/1").is_none());
        assert_eq!(restored.get("users/2").unwrap().etag, Etag::INITIAL);

        let err = restored.query("Missing", QueryRequest::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IndexNotFound);
    }
}
