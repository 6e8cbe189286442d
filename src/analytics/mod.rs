//! Ingestion building blocks for campaign visit events
//!
//! Each stage of the pipeline lives in its own module: bot filtering, rate
//! limiting, parameter sanitizing, geolocation and visitor identification.
//! The [`crate::tracker::Tracker`] wires them together.

pub mod bot;
pub mod geo;
pub mod models;
pub mod rate_limit;
pub mod sanitize;
pub mod visitor;

pub use bot::{BotFilter, Classification, CrawlerDetector};
pub use geo::{GeoError, GeoProvider, GeoResolver, IpstackProvider};
pub use models::{
    CleanParams, DeviceClass, GeoLocation, RateLimitRecord, RawParams, UtmEvent, UTM_KEYS,
};
pub use rate_limit::RateLimiter;
pub use visitor::{hash_ip, Visitor};
