use std::collections::HashMap;
use std::time::Duration;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;
use crate::core::database::Database;
use crate::core::error::{Error, Result};
use crate::core::types::{Document, Etag, Fields, Value};
use crate::query::types::QueryRequest;
use crate::search::results::QueryResults;
use crate::writer::batch::{BatchResult, WriteBatch, WriteOp, WriteOutcome};

/// A typed document. Stored under `collection()`; the identity property of its
/// JSON form holds the document id.
pub trait Entity: Serialize + DeserializeOwned {
    fn collection() -> &'static str;
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Send the loaded etag with every update and delete.
    pub optimistic_concurrency: bool,
    /// Wait for non-stale results on every query issued through the session.
    pub wait_for_non_stale_results: bool,
    /// Falls back to the database default when `None`.
    pub wait_timeout: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            optimistic_concurrency: true,
            wait_for_non_stale_results: false,
            wait_timeout: None,
        }
    }
}

/// Index of a tracked document inside its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityHandle(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackState {
    New,
    Persisted,
    Deleted,
    /// Deleted and saved; the handle no longer resolves.
    Gone,
}

#[derive(Debug)]
struct Tracked {
    id: String,
    collection: Option<String>,
    body: Fields,
    /// Body as last loaded or saved.
    original: Option<Fields>,
    etag: Option<Etag>,
    state: TrackState,
}

impl Tracked {
    fn from_document(doc: &Document) -> Self {
        Tracked {
            id: doc.id.clone(),
            collection: Some(doc.collection.clone()),
            body: doc.body.clone(),
            original: Some(doc.body.clone()),
            etag: Some(doc.etag),
            state: TrackState::Persisted,
        }
    }

    fn is_live(&self) -> bool {
        matches!(self.state, TrackState::New | TrackState::Persisted)
    }
}

/// Unit of work over a [`Database`].
///
/// Loads go through an identity map: loading the same id twice yields the same
/// handle. Stores, edits and deletes stay local until [`Session::save_changes`]
/// sends them to the store as one batch.
pub struct Session<'db> {
    id: Uuid,
    db: &'db Database,
    options: SessionOptions,
    arena: Vec<Tracked>,
    by_id: HashMap<String, EntityHandle>,
}

impl<'db> Session<'db> {
    pub(crate) fn new(db: &'db Database, options: SessionOptions) -> Self {
        Session {
            id: Uuid::new_v4(),
            db,
            options,
            arena: Vec::new(),
            by_id: HashMap::new(),
        }
    }

    /// Random id, attached to the session's log events.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Track a new document in `collection`. The identity property of `body`,
    /// when it holds text, is used as the id; otherwise one is generated now.
    pub fn store(&mut self, collection: &str, mut body: Fields) -> Result<EntityHandle> {
        let id = match body.remove(self.identity_property()) {
            Some(Value::Text(id)) if !id.is_empty() => id,
            _ => self.db.generate_id(collection),
        };
        self.track_new(id, Some(collection.to_string()), body)
    }

    /// Track a new document under `id`. An id ending in `/` is completed by the
    /// store on save.
    pub fn store_with_id(&mut self, id: &str, mut body: Fields) -> Result<EntityHandle> {
        if id.is_empty() {
            return Err(Error::InvalidInput("document id must not be empty".to_string()));
        }
        body.remove(self.identity_property());
        self.track_new(id.to_string(), None, body)
    }

    pub fn store_entity<T: Entity>(&mut self, entity: &T) -> Result<EntityHandle> {
        let body = entity_fields(entity)?;
        self.store(T::collection(), body)
    }

    fn track_new(&mut self, id: String, collection: Option<String>, body: Fields) -> Result<EntityHandle> {
        if let Some(&handle) = self.by_id.get(&id) {
            let tracked = &self.arena[handle.0];
            if tracked.is_live() && tracked.body == body {
                return Ok(handle);
            }
            if tracked.is_live() {
                return Err(Error::NonUniqueObject(id));
            }
        }

        let handle = EntityHandle(self.arena.len());
        // Suffix ids are only known after save.
        if !id.ends_with('/') {
            self.by_id.insert(id.clone(), handle);
        }
        self.arena.push(Tracked {
            id,
            collection,
            body,
            original: None,
            etag: None,
            state: TrackState::New,
        });
        Ok(handle)
    }

    /// Load and track `id`. Repeated loads return the same handle.
    pub fn load(&mut self, id: &str) -> Result<Option<EntityHandle>> {
        if let Some(&handle) = self.by_id.get(id) {
            return Ok(self.arena[handle.0].is_live().then_some(handle));
        }
        Ok(self.db.try_get(id).map(|doc| self.track_loaded(&doc)))
    }

    pub fn load_entity<T: Entity>(&mut self, id: &str) -> Result<Option<T>> {
        match self.load(id)? {
            Some(handle) => self.entity(handle).map(Some),
            None => Ok(None),
        }
    }

    /// Load documents whose id starts with `prefix`, in id order.
    pub fn load_starting_with(&mut self, prefix: &str, skip: usize, take: usize) -> Vec<EntityHandle> {
        self.db
            .scan_by_prefix(prefix, skip, take)
            .iter()
            .filter_map(|doc| match self.by_id.get(&doc.id) {
                Some(&handle) => self.arena[handle.0].is_live().then_some(handle),
                None => Some(self.track_loaded(doc)),
            })
            .collect()
    }

    fn track_loaded(&mut self, doc: &Document) -> EntityHandle {
        let handle = EntityHandle(self.arena.len());
        self.arena.push(Tracked::from_document(doc));
        self.by_id.insert(doc.id.clone(), handle);
        handle
    }

    /// Body of a tracked document, without the identity property.
    pub fn get(&self, handle: EntityHandle) -> Option<&Fields> {
        self.live(handle).map(|tracked| &tracked.body)
    }

    /// Mutable body; changes are detected on save.
    pub fn entity_mut(&mut self, handle: EntityHandle) -> Option<&mut Fields> {
        self.arena
            .get_mut(handle.0)
            .filter(|tracked| tracked.is_live())
            .map(|tracked| &mut tracked.body)
    }

    /// Current id. Suffix ids resolve after the first save.
    pub fn id_of(&self, handle: EntityHandle) -> Option<&str> {
        self.live(handle).map(|tracked| tracked.id.as_str())
    }

    pub fn etag_of(&self, handle: EntityHandle) -> Option<Etag> {
        self.live(handle).and_then(|tracked| tracked.etag)
    }

    /// Deserialize a tracked document, identity property included.
    pub fn entity<T: DeserializeOwned>(&self, handle: EntityHandle) -> Result<T> {
        let tracked = self
            .live(handle)
            .ok_or_else(|| Error::InvalidInput(format!("handle {:?} is not tracked", handle)))?;
        let mut fields = tracked.body.clone();
        fields.insert(self.identity_property().to_string(), Value::from(tracked.id.as_str()));
        Ok(serde_json::from_value(Value::Object(fields).to_json())?)
    }

    /// Replace a tracked document's body with `entity`.
    pub fn update_entity<T: Entity>(&mut self, handle: EntityHandle, entity: &T) -> Result<()> {
        let mut body = entity_fields(entity)?;
        body.remove(self.identity_property());
        let fields = self
            .entity_mut(handle)
            .ok_or_else(|| Error::InvalidInput(format!("handle {:?} is not tracked", handle)))?;
        *fields = body;
        Ok(())
    }

    /// Mark `id` for deletion. Untracked ids must exist in the store.
    pub fn delete(&mut self, id: &str) -> Result<()> {
        if let Some(&handle) = self.by_id.get(id) {
            let tracked = &mut self.arena[handle.0];
            match tracked.state {
                TrackState::New => {
                    tracked.state = TrackState::Gone;
                    self.by_id.remove(id);
                }
                TrackState::Persisted => tracked.state = TrackState::Deleted,
                TrackState::Deleted | TrackState::Gone => {}
            }
            return Ok(());
        }

        let doc = self.db.get(id)?;
        let handle = self.track_loaded(&doc);
        self.arena[handle.0].state = TrackState::Deleted;
        Ok(())
    }

    /// Query an index, applying the session's staleness settings.
    pub fn query(&self, index: &str, request: QueryRequest) -> Result<QueryResults> {
        self.db.query(index, self.with_session_wait(request))
    }

    /// Query the automatic index of `collection`.
    pub fn query_collection(&self, collection: &str, request: QueryRequest) -> Result<QueryResults> {
        self.db.query_collection(collection, self.with_session_wait(request))
    }

    fn with_session_wait(&self, mut request: QueryRequest) -> QueryRequest {
        if self.options.wait_for_non_stale_results {
            request.wait_for_non_stale = true;
            if request.wait_timeout.is_none() {
                request.wait_timeout = self.options.wait_timeout;
            }
        }
        request
    }

    /// Documents with unsaved changes, including pending deletes.
    pub fn has_changes(&self) -> bool {
        self.arena.iter().any(|tracked| self.pending_op(tracked).is_some())
    }

    /// Send every pending change to the store as one batch.
    pub fn save_changes(&mut self) -> Result<BatchResult> {
        let mut batch = WriteBatch::new();
        let mut positions = Vec::new();
        for (position, tracked) in self.arena.iter().enumerate() {
            if let Some(op) = self.pending_op(tracked) {
                batch.push(op);
                positions.push(position);
            }
        }

        let ops = batch.len();
        let result = self.db.commit(batch)?;

        for (outcome, &position) in result.outcomes.iter().zip(&positions) {
            let tracked = &mut self.arena[position];
            match outcome {
                WriteOutcome::Stored { id, etag, .. } => {
                    tracked.id = id.clone();
                    tracked.original = Some(tracked.body.clone());
                    tracked.etag = Some(*etag);
                    tracked.state = TrackState::Persisted;
                    self.by_id.insert(id.clone(), EntityHandle(position));
                }
                WriteOutcome::Deleted { id } => {
                    tracked.state = TrackState::Gone;
                    self.by_id.remove(id);
                }
            }
        }

        debug!(session = %self.id, ops, sequence = result.sequence, "session changes saved");
        Ok(result)
    }

    fn pending_op(&self, tracked: &Tracked) -> Option<WriteOp> {
        let expected = if self.options.optimistic_concurrency {
            tracked.etag
        } else {
            None
        };
        match tracked.state {
            TrackState::New => Some(WriteOp::Put {
                id: tracked.id.clone(),
                collection: tracked.collection.clone(),
                body: tracked.body.clone(),
                expected: None,
            }),
            TrackState::Persisted if tracked.original.as_ref() != Some(&tracked.body) => Some(WriteOp::Put {
                id: tracked.id.clone(),
                collection: None,
                body: tracked.body.clone(),
                expected,
            }),
            TrackState::Deleted => Some(WriteOp::Delete {
                id: tracked.id.clone(),
                expected,
            }),
            TrackState::Persisted | TrackState::Gone => None,
        }
    }

    fn live(&self, handle: EntityHandle) -> Option<&Tracked> {
        self.arena.get(handle.0).filter(|tracked| tracked.is_live())
    }

    fn identity_property(&self) -> &'db str {
        &self.db.config().identity_property
    }
}

fn entity_fields<T: Serialize>(entity: &T) -> Result<Fields> {
    match Value::from_json(serde_json::to_value(entity)?) {
        Value::Object(fields) => Ok(fields),
        other => Err(Error::InvalidInput(format!(
            "entities must serialize to an object, got {}",
            other
        ))),
    }
}
