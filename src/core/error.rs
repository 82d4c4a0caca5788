use std::time::Duration;
use thiserror::Error;
use crate::core::types::Etag;

/// Flat classification of [`Error`] for callers that only branch on the failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ConcurrencyConflict,
    NotFound,
    IndexNotFound,
    StaleIndexTimeout,
    MalformedPredicate,
    NonUniqueObject,
    TransformFailed,
    InvalidInput,
    Serialization,
    Io,
    Corruption,
}

#[derive(Debug, Error)]
pub enum Error {
    /// Expected etag did not match the stored one. Reload and retry.
    #[error("concurrency conflict on '{id}': expected {expected:?}, found {actual:?}")]
    ConcurrencyConflict {
        id: String,
        expected: Etag,
        actual: Option<Etag>,
    },

    #[error("document '{0}' not found")]
    NotFound(String),

    #[error("index '{0}' not found")]
    IndexNotFound(String),

    #[error("index '{index}' did not reach sequence {target} within {waited:?} (indexed up to {indexed})")]
    StaleIndexTimeout {
        index: String,
        target: u64,
        indexed: u64,
        waited: Duration,
    },

    #[error("field '{field}' is not part of the output of index '{index}'")]
    MalformedPredicate { index: String, field: String },

    #[error("a different object with id '{0}' is already tracked by this session")]
    NonUniqueObject(String),

    #[error("transform of index '{index}' failed: {reason}")]
    TransformFailed { index: String, reason: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("data corruption: {0}")]
    Corruption(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ConcurrencyConflict { .. } => ErrorKind::ConcurrencyConflict,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::IndexNotFound(_) => ErrorKind::IndexNotFound,
            Error::StaleIndexTimeout { .. } => ErrorKind::StaleIndexTimeout,
            Error::MalformedPredicate { .. } => ErrorKind::MalformedPredicate,
            Error::NonUniqueObject(_) => ErrorKind::NonUniqueObject,
            Error::TransformFailed { .. } => ErrorKind::TransformFailed,
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::Serialization(_) => ErrorKind::Serialization,
            Error::Io(_) => ErrorKind::Io,
            Error::Corruption(_) => ErrorKind::Corruption,
        }
    }

    /// Conflicts, missing documents and stale waits can succeed on retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ConcurrencyConflict | ErrorKind::NotFound | ErrorKind::StaleIndexTimeout
        )
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure raised by a map, reduce or transform callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MapError {
    #[error("{0}")]
    Failed(String),

    #[error("missing field '{0}'")]
    MissingField(String),

    #[error("callback panicked: {0}")]
    Panicked(String),
}

impl MapError {
    pub fn failed(message: impl Into<String>) -> Self {
        MapError::Failed(message.into())
    }
}
