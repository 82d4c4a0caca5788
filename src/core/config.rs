use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Property that carries the document id on entities and projections.
    pub identity_property: String,

    pub default_wait_timeout: Duration,     // non-stale wait bound when the query sets none
    pub max_reduce_passes: usize,           // re-entrant folds of rows sharing a reduce key
    pub query_cache_size: usize,            // 0 disables the query cache
    pub parallel_rebuild_threshold: usize,  // rebuilds over more docs map on rayon
    pub max_index_errors: usize,            // retained per index, oldest dropped first
}

impl Default for Config {
    fn default() -> Self {
        Config {
            identity_property: "Id".to_string(),
            default_wait_timeout: Duration::from_secs(15),
            max_reduce_passes: 8,
            query_cache_size: 256,
            parallel_rebuild_threshold: 1024,
            max_index_errors: 100,
        }
    }
}

impl Config {
    pub fn in_memory() -> Self {
        Config::default()
    }

    pub fn with_identity_property(mut self, name: impl Into<String>) -> Self {
        self.identity_property = name.into();
        self
    }

    pub fn with_default_wait_timeout(mut self, timeout: Duration) -> Self {
        self.default_wait_timeout = timeout;
        self
    }

    pub fn with_max_reduce_passes(mut self, passes: usize) -> Self {
        self.max_reduce_passes = passes.max(1);
        self
    }

    pub fn with_query_cache_size(mut self, entries: usize) -> Self {
        self.query_cache_size = entries;
        self
    }

    pub fn with_parallel_rebuild_threshold(mut self, docs: usize) -> Self {
        self.parallel_rebuild_threshold = docs;
        self
    }

    pub fn with_max_index_errors(mut self, errors: usize) -> Self {
        self.max_index_errors = errors;
        self
    }
}
