use serde::{Serialize, Deserialize};
use crate::core::types::{Etag, Fields};

/// One mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WriteOp {
    /// An empty `id` asks the store for `<collection>/<n>`; an id ending in `/`
    /// is completed with the next value of that prefix's counter.
    Put {
        id: String,
        collection: Option<String>,
        body: Fields,
        expected: Option<Etag>,
    },
    Delete {
        id: String,
        expected: Option<Etag>,
    },
}

impl WriteOp {
    pub fn id(&self) -> &str {
        match self {
            WriteOp::Put { id, .. } | WriteOp::Delete { id, .. } => id,
        }
    }
}

/// Mutations committed atomically under one write sequence number.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        WriteBatch::default()
    }

    pub fn put(mut self, id: impl Into<String>, body: Fields) -> Self {
        self.ops.push(WriteOp::Put {
            id: id.into(),
            collection: None,
            body,
            expected: None,
        });
        self
    }

    pub fn put_in(mut self, collection: impl Into<String>, id: impl Into<String>, body: Fields) -> Self {
        self.ops.push(WriteOp::Put {
            id: id.into(),
            collection: Some(collection.into()),
            body,
            expected: None,
        });
        self
    }

    pub fn put_expecting(mut self, id: impl Into<String>, body: Fields, expected: Etag) -> Self {
        self.ops.push(WriteOp::Put {
            id: id.into(),
            collection: None,
            body,
            expected: Some(expected),
        });
        self
    }

    pub fn delete(mut self, id: impl Into<String>) -> Self {
        self.ops.push(WriteOp::Delete {
            id: id.into(),
            expected: None,
        });
        self
    }

    pub fn delete_expecting(mut self, id: impl Into<String>, expected: Etag) -> Self {
        self.ops.push(WriteOp::Delete {
            id: id.into(),
            expected: Some(expected),
        });
        self
    }

    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Result of one op, in batch order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Stored {
        requested_id: String,
        id: String,
        etag: Etag,
    },
    Deleted {
        id: String,
    },
}

#[derive(Debug, Clone)]
pub struct BatchResult {
    pub sequence: u64,
    pub outcomes: Vec<WriteOutcome>,
}

impl BatchResult {
    /// Etag assigned to `id` by this batch, if it was stored.
    pub fn etag_of(&self, id: &str) -> Option<Etag> {
        self.outcomes.iter().rev().find_map(|outcome| match outcome {
            WriteOutcome::Stored { id: stored, etag, .. } if stored == id => Some(*etag),
            _ => None,
        })
    }

    /// Final id of the op at `position`.
    pub fn id_at(&self, position: usize) -> Option<&str> {
        self.outcomes.get(position).map(|outcome| match outcome {
            WriteOutcome::Stored { id, .. } | WriteOutcome::Deleted { id } => id.as_str(),
        })
    }
}
