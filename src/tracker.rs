//! Campaign visit ingestion and aggregate counting
//!
//! [`Tracker`] is the process-wide handle. It owns the storage and the three
//! cache regions and runs each `track` call through the pipeline:
//! bot filter → rate limiter → sanitizer → geolocation → insert.

use chrono::Local;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::analytics::models::{has_utm_signal, GeneratedFields};
use crate::analytics::{
    hash_ip, sanitize, BotFilter, DeviceClass, GeoProvider, GeoResolver, IpstackProvider,
    RateLimiter, RawParams, UtmEvent, Visitor,
};
use crate::cache::CacheRegions;
use crate::config::Config;
use crate::storage::{
    date_range_filter, percent_change, AggregateQuery, CachedStorage, EventColumn, Filter,
    SqliteStorage, Storage, StorageResult,
};

const MAX_CONNECTIONS: u32 = 5;

/// Event counts of the last `days` days against the `days` before them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PeriodStats {
    pub days: u32,
    pub recent: i64,
    pub previous: i64,
    pub percent_change: i64,
}

pub struct Tracker {
    config: Arc<Config>,
    caches: CacheRegions,
    bot_filter: BotFilter,
    rate_limiter: RateLimiter,
    geo: GeoResolver,
    storage: Arc<dyn Storage>,
}

impl Tracker {
    /// Build a tracker on shared cache regions and a geolocation provider
    ///
    /// With `debug` set, every region is flushed first so runs start clean.
    pub fn new(config: Config, caches: CacheRegions, provider: Arc<dyn GeoProvider>) -> Self {
        if config.debug {
            caches.flush_all();
        }

        let sqlite: Arc<dyn Storage> = Arc::new(SqliteStorage::new(&config.file, MAX_CONNECTIONS));
        let storage: Arc<dyn Storage> =
            Arc::new(CachedStorage::new(sqlite, caches.queries.clone()));

        let rate_limiter = RateLimiter::new(config.ratelimit.clone(), caches.ratelimit.clone());
        let geo = GeoResolver::new(config.enabled, &config.ipstack, provider, caches.geo.clone());

        Self {
            config: Arc::new(config),
            caches,
            bot_filter: BotFilter::new(),
            rate_limiter,
            geo,
            storage,
        }
    }

    /// Build a tracker with fresh cache regions and the ipstack provider
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let provider = Arc::new(IpstackProvider::new(&config.ipstack)?);
        let caches = CacheRegions::new(config.cache_capacity);
        Ok(Self::new(config, caches, provider))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn caches(&self) -> &CacheRegions {
        &self.caches
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// The configured override wins over the request's address
    fn client_ip<'a>(&'a self, visitor: &'a Visitor) -> &'a str {
        self.config
            .ip
            .as_deref()
            .or(visitor.ip.as_deref())
            .map(str::trim)
            .unwrap_or_default()
    }

    /// Record one visit of `page_id`; returns whether an event was stored
    ///
    /// Only storage faults are reported as errors. Disabled ingestion, bots,
    /// exhausted rate limits and parameters without UTM data are rejected
    /// with `Ok(false)`.
    pub async fn track(
        &self,
        visitor: &Visitor,
        page_id: &str,
        params: &RawParams,
    ) -> StorageResult<bool> {
        if !self.config.enabled {
            return Ok(false);
        }
        if page_id.trim().is_empty() {
            debug!("rejected event without page id");
            return Ok(false);
        }

        let classification = self.bot_filter.classify(&visitor.user_agent);
        if classification.is_automated() {
            debug!(page_id, ?classification, "rejected automated visitor");
            return Ok(false);
        }

        let ip = self.client_ip(visitor);
        let iphash = hash_ip(&self.config.salt, ip);

        if !self.rate_limiter.allow(&iphash).await {
            debug!(page_id, "rejected rate limited visitor");
            return Ok(false);
        }

        let params = sanitize::sanitize(params);
        if !has_utm_signal(&params) {
            debug!(page_id, "rejected event without utm parameters");
            return Ok(false);
        }

        let location = self.geo.resolve(ip, &iphash).await;
        let generated = GeneratedFields {
            visited_at: Local::now(),
            iphash,
            country: location.country_name.unwrap_or_default(),
            city: location.city.unwrap_or_default(),
            device: DeviceClass::from_user_agent(&visitor.user_agent),
        };

        let event = UtmEvent::assemble(page_id, generated, &params);
        let id = self.storage.insert(&event).await?;
        debug!(page_id, id, "recorded utm event");

        Ok(true)
    }

    /// Memoized aggregate; 0 while ingestion is disabled
    pub async fn count(&self, query: &AggregateQuery) -> StorageResult<i64> {
        if !self.config.enabled {
            return Ok(0);
        }
        self.storage.count(query).await
    }

    pub async fn count_all(&self) -> StorageResult<i64> {
        self.count(&AggregateQuery::count_all()).await
    }

    /// Compare the last `days` days with the window right before them
    pub async fn period_stats(&self, days: u32, page_id: Option<&str>) -> StorageResult<PeriodStats> {
        let scoped = |filter: Filter| match page_id {
            Some(page_id) => Filter::equals(EventColumn::PageId, page_id).and(filter),
            None => filter,
        };

        let recent_filter = scoped(date_range_filter(days, 0, EventColumn::VisitedAt));
        let previous_filter = scoped(date_range_filter(
            days.saturating_mul(2),
            days,
            EventColumn::VisitedAt,
        ));

        let recent = self.count(&AggregateQuery::count_where(&recent_filter)).await?;
        let previous = self.count(&AggregateQuery::count_where(&previous_filter)).await?;

        Ok(PeriodStats {
            days,
            recent,
            previous,
            percent_change: percent_change(recent, previous),
        })
    }
}
