use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::analytics::UtmEvent;
use crate::cache::CacheRegion;
use crate::storage::query::AggregateQuery;
use crate::storage::{Storage, StorageResult};

/// Storage wrapper that memoizes aggregate results
///
/// Every successful insert flushes the whole query region, so a count never
/// trails the most recent write made through this wrapper.
pub struct CachedStorage {
    /// Underlying storage implementation
    inner: Arc<dyn Storage>,
    /// Memoized aggregate results keyed by query hash
    query_cache: CacheRegion<i64>,
}

impl CachedStorage {
    pub fn new(inner: Arc<dyn Storage>, query_cache: CacheRegion<i64>) -> Self {
        Self { inner, query_cache }
    }
}

#[async_trait]
impl Storage for CachedStorage {
    async fn ensure_schema(&self) -> StorageResult<bool> {
        self.inner.ensure_schema().await
    }

    async fn insert(&self, event: &UtmEvent) -> StorageResult<i64> {
        let id = self.inner.insert(event).await?;
        self.query_cache.flush();
        Ok(id)
    }

    async fn count(&self, query: &AggregateQuery) -> StorageResult<i64> {
        let key = query.cache_key();
        if let Some(cached) = self.query_cache.get(&key).await {
            return Ok(cached);
        }

        // Cache miss - run against the underlying storage
        let value = self.inner.count(query).await?;
        debug!(key = %key, value, "memoized aggregate");
        self.query_cache.set(&key, value, None).await;

        Ok(value)
    }
}
