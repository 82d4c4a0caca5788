use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use crate::core::error::{Error, MapError, Result};
use crate::core::types::{Document, Fields, Value};
use crate::schema::schema::{FieldOptions, IndexSchema};
use crate::storage::document_store::DocumentStore;

pub type MapFn = Arc<dyn Fn(&Document) -> std::result::Result<Vec<Fields>, MapError> + Send + Sync>;
pub type ReduceFn = Arc<dyn Fn(&[Fields]) -> std::result::Result<Vec<Fields>, MapError> + Send + Sync>;
pub type TransformFn =
    Arc<dyn Fn(Fields, &TransformContext<'_>) -> std::result::Result<Fields, MapError> + Send + Sync>;

/// Prefix of automatically created collection indexes.
pub const AUTO_INDEX_PREFIX: &str = "Auto/";

/// Map function over the documents of one collection.
#[derive(Clone)]
pub struct MapStage {
    pub collection: String,
    pub map: MapFn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceScope {
    /// The reduce function receives the map entries of one reduce key and must
    /// keep that key. Only touched keys are recomputed.
    Group,
    /// The reduce function receives every current map entry and may re-key.
    /// The whole reduce output is recomputed on every affecting batch, at a
    /// cost of O(total map entries).
    AllEntries,
}

#[derive(Clone)]
pub struct ReduceStage {
    pub group_by: Vec<String>,
    pub scope: ReduceScope,
    pub reduce: ReduceFn,
}

/// Compiled index definition. Callbacks must be pure and deterministic.
#[derive(Clone)]
pub struct IndexDefinition {
    pub name: String,
    pub maps: Vec<MapStage>,
    pub reduce: Option<ReduceStage>,
    pub transform: Option<TransformFn>,
    pub schema: IndexSchema,
}

impl fmt::Debug for IndexDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexDefinition")
            .field("name", &self.name)
            .field("collections", &self.collections())
            .field("group_by", &self.reduce.as_ref().map(|r| &r.group_by))
            .field("scope", &self.reduce.as_ref().map(|r| r.scope))
            .field("transform", &self.transform.is_some())
            .field("schema", &self.schema)
            .finish()
    }
}

impl IndexDefinition {
    pub fn builder(name: impl Into<String>) -> IndexDefinitionBuilder {
        IndexDefinitionBuilder {
            name: name.into(),
            maps: Vec::new(),
            reduce: None,
            transform: None,
            schema: IndexSchema::new(),
        }
    }

    /// Map index over every top-level field of a collection, plus the id
    /// under `identity_property`. Accepts predicates on any field.
    pub fn auto(collection: &str, identity_property: &str) -> IndexDefinition {
        let identity = identity_property.to_string();
        let map: MapFn = Arc::new(move |doc: &Document| {
            let mut row = doc.body.clone();
            row.insert(identity.clone(), Value::Text(doc.id.clone()));
            Ok(vec![row])
        });
        IndexDefinition {
            name: format!("{}{}", AUTO_INDEX_PREFIX, collection),
            maps: vec![MapStage {
                collection: collection.to_string(),
                map,
            }],
            reduce: None,
            transform: None,
            schema: IndexSchema::dynamic(),
        }
    }

    /// Distinct source collections, in declaration order.
    pub fn collections(&self) -> Vec<&str> {
        let mut collections: Vec<&str> = Vec::new();
        for stage in &self.maps {
            if !collections.contains(&stage.collection.as_str()) {
                collections.push(&stage.collection);
            }
        }
        collections
    }

    pub fn reads_collection(&self, collection: &str) -> bool {
        self.maps.iter().any(|stage| stage.collection == collection)
    }

    pub fn is_map_reduce(&self) -> bool {
        self.reduce.is_some()
    }

    pub fn group_by(&self) -> &[String] {
        self.reduce.as_ref().map(|r| r.group_by.as_slice()).unwrap_or(&[])
    }
}

pub struct IndexDefinitionBuilder {
    name: String,
    maps: Vec<MapStage>,
    reduce: Option<ReduceStage>,
    transform: Option<TransformFn>,
    schema: IndexSchema,
}

impl IndexDefinitionBuilder {
    /// Add a map function. Repeat for a multi-map index.
    pub fn map<F>(mut self, collection: impl Into<String>, map: F) -> Self
    where
        F: Fn(&Document) -> std::result::Result<Vec<Fields>, MapError> + Send + Sync + 'static,
    {
        self.maps.push(MapStage {
            collection: collection.into(),
            map: Arc::new(map),
        });
        self
    }

    pub fn reduce<F>(self, group_by: &[&str], reduce: F) -> Self
    where
        F: Fn(&[Fields]) -> std::result::Result<Vec<Fields>, MapError> + Send + Sync + 'static,
    {
        self.reduce_with_scope(group_by, ReduceScope::Group, reduce)
    }

    pub fn reduce_all_entries<F>(self, group_by: &[&str], reduce: F) -> Self
    where
        F: Fn(&[Fields]) -> std::result::Result<Vec<Fields>, MapError> + Send + Sync + 'static,
    {
        self.reduce_with_scope(group_by, ReduceScope::AllEntries, reduce)
    }

    fn reduce_with_scope<F>(mut self, group_by: &[&str], scope: ReduceScope, reduce: F) -> Self
    where
        F: Fn(&[Fields]) -> std::result::Result<Vec<Fields>, MapError> + Send + Sync + 'static,
    {
        for field in group_by {
            self.schema.declare(field);
        }
        self.reduce = Some(ReduceStage {
            group_by: group_by.iter().map(|f| f.to_string()).collect(),
            scope,
            reduce: Arc::new(reduce),
        });
        self
    }

    pub fn transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(Fields, &TransformContext<'_>) -> std::result::Result<Fields, MapError> + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }

    pub fn field(mut self, name: &str, options: FieldOptions) -> Self {
        self.schema.set_options(name, options);
        self
    }

    /// Declare an output field that maps may leave absent on every row.
    pub fn declare(mut self, name: &str) -> Self {
        self.schema.declare(name);
        self
    }

    pub fn build(self) -> Result<IndexDefinition> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidInput("index name must not be empty".to_string()));
        }
        if self.name.starts_with(AUTO_INDEX_PREFIX) {
            return Err(Error::InvalidInput(format!(
                "index names starting with '{}' are reserved",
                AUTO_INDEX_PREFIX
            )));
        }
        if self.maps.is_empty() {
            return Err(Error::InvalidInput(format!(
                "index '{}' needs at least one map function",
                self.name
            )));
        }
        if let Some(reduce) = &self.reduce {
            if reduce.group_by.is_empty() {
                return Err(Error::InvalidInput(format!(
                    "reduce of index '{}' needs at least one group-by field",
                    self.name
                )));
            }
        }

        Ok(IndexDefinition {
            name: self.name,
            maps: self.maps,
            reduce: self.reduce,
            transform: self.transform,
            schema: self.schema,
        })
    }
}

/// Read-only store access handed to transform functions.
pub struct TransformContext<'a> {
    store: &'a DocumentStore,
}

impl<'a> TransformContext<'a> {
    pub fn new(store: &'a DocumentStore) -> Self {
        TransformContext { store }
    }

    pub fn load(&self, id: &str) -> Option<Arc<Document>> {
        self.store.try_get(id)
    }

    /// Load every id held by `ids` (a single id or a list of ids). Missing
    /// documents and non-text elements are skipped.
    pub fn load_many(&self, ids: &Value) -> Vec<Arc<Document>> {
        ids.elements()
            .filter_map(Value::as_str)
            .filter_map(|id| self.store.try_get(id))
            .collect()
    }
}

/// Run a user callback, turning a panic into [`MapError::Panicked`].
pub(crate) fn guarded<T>(
    callback: impl FnOnce() -> std::result::Result<T, MapError>,
) -> std::result::Result<T, MapError> {
    match catch_unwind(AssertUnwindSafe(callback)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            Err(MapError::Panicked(message))
        }
    }
}
