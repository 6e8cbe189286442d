use async_trait::async_trait;
use thiserror::Error;

use crate::analytics::UtmEvent;
use crate::storage::query::AggregateQuery;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("storage file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid aggregate query: {0}")]
    InvalidQuery(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Create the event table when the backing store does not exist yet
    ///
    /// Returns `true` when this call created the schema. Existing stores are
    /// never altered, so repeated calls are harmless.
    async fn ensure_schema(&self) -> StorageResult<bool>;

    /// Append one event and return its surrogate key
    async fn insert(&self, event: &UtmEvent) -> StorageResult<i64>;

    /// Run an aggregate query and return the first column of its first row
    async fn count(&self, query: &AggregateQuery) -> StorageResult<i64>;
}
