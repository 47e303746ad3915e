use std::path::PathBuf;

use crate::source::SourceType;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),

    /// A dependency (embedding model, completion provider) is missing or
    /// failed to load.
    #[error("{feature} unavailable: {reason}")]
    Unavailable {
        feature: &'static str,
        reason: String,
    },

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("could not process query")]
    QueryFailed(#[source] Box<Error>),

    #[error("malformed {source_type} record {object_id}: {reason}")]
    MalformedRecord {
        source_type: SourceType,
        object_id: String,
        reason: String,
    },

    #[error("vector dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("completion error: {0}")]
    Completion(String),

    #[error("document source error: {0}")]
    Source(String),
}

impl Error {
    /// Returns `true` for the feature-unavailable class of errors, the
    /// ones callers are expected to degrade on instead of failing.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Error::Unavailable { .. })
    }

    pub(crate) fn query_failed(self) -> Self {
        match self {
            Error::QueryFailed(_) | Error::InvalidQuery(_) => self,
            other => Error::QueryFailed(Box::new(other)),
        }
    }
}
