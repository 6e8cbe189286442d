//! Named TTL cache regions backed by Moka
//!
//! Each region is an independent key/value store that supports per-entry
//! time-to-live and a full flush. The tracker uses three of them: memoized
//! query results, resolved geolocations and rate-limit counters.

use moka::future::Cache;
use moka::Expiry;
use std::time::{Duration, Instant};

/// Stored value together with the lifetime it was inserted with
#[derive(Debug, Clone)]
struct Expiring<V> {
    value: V,
    ttl: Option<Duration>,
}

/// Expiry policy reading the lifetime carried by each entry
struct PerEntryTtl;

impl<V> Expiry<String, Expiring<V>> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Expiring<V>,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Expiring<V>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// A single flushable cache region
#[derive(Clone)]
pub struct CacheRegion<V: Clone + Send + Sync + 'static> {
    name: &'static str,
    inner: Cache<String, Expiring<V>>,
}

impl<V: Clone + Send + Sync + 'static> CacheRegion<V> {
    pub fn new(name: &'static str, max_capacity: u64) -> Self {
        let inner = Cache::builder()
            .name(name)
            .max_capacity(max_capacity)
            .expire_after(PerEntryTtl)
            .build();

        Self { name, inner }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        self.inner.get(key).await.map(|entry| entry.value)
    }

    /// Insert or replace `key`; `None` keeps the entry until evicted or flushed
    pub async fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        self.inner
            .insert(key.to_string(), Expiring { value, ttl })
            .await;
    }

    /// Drop every entry in this region
    pub fn flush(&self) {
        self.inner.invalidate_all();
        tracing::debug!(region = self.name, "cache region flushed");
    }
}

/// The three process-wide cache regions, shared by cloning the handle
#[derive(Clone)]
pub struct CacheRegions {
    pub queries: CacheRegion<i64>,
    pub geo: CacheRegion<crate::analytics::GeoLocation>,
    pub ratelimit: CacheRegion<crate::analytics::RateLimitRecord>,
}

impl CacheRegions {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            queries: CacheRegion::new("utm.queries", max_capacity),
            geo: CacheRegion::new("utm.geo", max_capacity),
            ratelimit: CacheRegion::new("utm.ratelimit", max_capacity),
        }
    }

    pub fn flush_all(&self) {
        self.queries.flush();
        self.geo.flush();
        self.ratelimit.flush();
    }
}

/// Longest lifetime any entry is given
pub const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Convert a minute-based setting into a TTL, where 0 means no expiry
///
/// Values past [`MAX_TTL`] are clamped to it.
pub fn minutes_ttl(minutes: u64) -> Option<Duration> {
    (minutes > 0).then(|| {
        minutes
            .checked_mul(60)
            .map(Duration::from_secs)
            .map_or(MAX_TTL, |ttl| ttl.min(MAX_TTL))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_and_flush() {
        let region: CacheRegion<i64> = CacheRegion::new("test", 100);
        region.set("a", 1, None).await;
        region.set("b", 2, Some(Duration::from_secs(60))).await;

        assert_eq!(region.get("a").await, Some(1));
        assert_eq!(region.get("b").await, Some(2));
        assert_eq!(region.get("c").await, None);

        region.flush();
        assert_eq!(region.get("a").await, None);
        assert_eq!(region.get("b").await, None);
    }

    #[tokio::test]
    async fn test_entry_expires_after_ttl() {
        let region: CacheRegion<i64> = CacheRegion::new("test", 100);
        region.set("short", 7, Some(Duration::from_millis(50))).await;
        assert_eq!(region.get("short").await, Some(7));

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(region.get("short").await, None);
    }

    #[tokio::test]
    async fn test_regions_flush_independently() {
        let regions = CacheRegions::new(100);
        regions.queries.set("q", 10, None).await;
        regions.geo.set("g", Default::default(), None).await;

        regions.queries.flush();
        assert_eq!(regions.queries.get("q").await, None);
        assert!(regions.geo.get("g").await.is_some());

        regions.flush_all();
        assert!(regions.geo.get("g").await.is_none());
    }

    #[test]
    fn test_minutes_ttl() {
        assert_eq!(minutes_ttl(0), None);
        assert_eq!(minutes_ttl(2), Some(Duration::from_secs(120)));
    }

    #[tokio::test]
    async fn test_minutes_ttl_clamps_huge_values() {
        assert_eq!(minutes_ttl(u64::MAX), Some(MAX_TTL));
        assert_eq!(minutes_ttl(1_000_000_000_000), Some(MAX_TTL));
        assert_eq!(minutes_ttl(525_600), Some(MAX_TTL));

        let region: CacheRegion<i64> = CacheRegion::new("test", 100);
        region.set("long", 1, minutes_ttl(u64::MAX)).await;
        assert_eq!(region.get("long").await, Some(1));
    }
}
