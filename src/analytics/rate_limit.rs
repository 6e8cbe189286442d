//! Fixed-window rate limiting per visitor hash
//!
//! Each visitor hash owns one [`RateLimitRecord`] in the `ratelimit` cache
//! region. The window opens on the first visit and allows `trials` events
//! until it elapses; a burst straddling a window boundary can therefore
//! reach twice the nominal rate.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;
use tracing::debug;

use crate::analytics::models::RateLimitRecord;
use crate::cache::CacheRegion;
use crate::config::RateLimitConfig;

pub struct RateLimiter {
    config: RateLimitConfig,
    records: CacheRegion<RateLimitRecord>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, records: CacheRegion<RateLimitRecord>) -> Self {
        Self { config, records }
    }

    /// End of a window opened at `start`
    ///
    /// `None` when the end lies past what `DateTime` can hold; such a window
    /// never elapses.
    fn window_end(&self, start: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let minutes = i64::try_from(self.config.window_minutes).ok()?;
        start.checked_add_signed(ChronoDuration::try_minutes(minutes)?)
    }

    fn ttl(&self) -> Option<Duration> {
        crate::cache::minutes_ttl(self.config.window_minutes)
    }

    /// Consume one trial for `iphash`, returning whether the event may proceed
    pub async fn allow(&self, iphash: &str) -> bool {
        self.allow_at(iphash, Utc::now()).await
    }

    pub async fn allow_at(&self, iphash: &str, now: DateTime<Utc>) -> bool {
        if !self.config.enabled {
            return true;
        }

        let current = self
            .records
            .get(iphash)
            .await
            .filter(|record| self.window_end(record.window_start).map_or(true, |end| now < end));

        match current {
            Some(record) => {
                if record.trials < self.config.trials {
                    let next = RateLimitRecord {
                        window_start: record.window_start,
                        trials: record.trials + 1,
                    };
                    self.records.set(iphash, next, self.ttl()).await;
                    true
                } else {
                    debug!(iphash, trials = record.trials, "rate limit reached");
                    false
                }
            }
            None => {
                let fresh = RateLimitRecord {
                    window_start: now,
                    trials: 1,
                };
                self.records.set(iphash, fresh, self.ttl()).await;
                true
            }
        }
    }
}
