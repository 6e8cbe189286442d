//! Remote IP geolocation with per-visitor caching
//!
//! Lookups go to an ipstack-compatible HTTP API. Results are cached under the
//! visitor hash after the provider's `ip` and `hostname` fields have been
//! removed, so the plaintext address never reaches the cache.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::analytics::models::GeoLocation;
use crate::cache::CacheRegion;
use crate::config::IpstackConfig;

/// Provider fields that identify the visitor and must not be retained
const PRIVATE_FIELDS: [&str; 2] = ["ip", "hostname"];

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("geolocation request timed out")]
    Timeout,
    #[error("geolocation request failed: {0}")]
    Transport(String),
}

/// Raw JSON object returned by a provider
pub type ProviderPayload = Map<String, Value>;

#[async_trait]
pub trait GeoProvider: Send + Sync {
    /// Look up `ip` with the given access key
    ///
    /// `Ok(None)` means the provider answered without a usable payload
    /// (non-success status, malformed body, or an explicit failure).
    async fn lookup(&self, ip: IpAddr, access_key: &str) -> Result<Option<ProviderPayload>, GeoError>;
}

/// ipstack HTTP client
pub struct IpstackProvider {
    client: reqwest::Client,
    base_url: String,
}

impl IpstackProvider {
    pub fn new(config: &IpstackConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: format!("{}://{}", config.scheme(), config.endpoint.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl GeoProvider for IpstackProvider {
    async fn lookup(&self, ip: IpAddr, access_key: &str) -> Result<Option<ProviderPayload>, GeoError> {
        let url = reqwest::Url::parse_with_params(
            &format!("{}/{}/", self.base_url, ip),
            &[("access_key", access_key)],
        )
        .map_err(|e| GeoError::Transport(e.to_string()))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GeoError::Timeout
                } else {
                    GeoError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            debug!(%status, "geolocation provider returned non-success status");
            return Ok(None);
        }

        let payload = match response.json::<ProviderPayload>().await {
            Ok(payload) => payload,
            Err(e) if e.is_timeout() => return Err(GeoError::Timeout),
            Err(e) => {
                debug!(error = %e, "geolocation provider returned a malformed body");
                return Ok(None);
            }
        };

        // ipstack reports bad keys and quota errors with 200 and `success: false`
        if payload.get("success").and_then(Value::as_bool) == Some(false) {
            debug!("geolocation provider rejected the request");
            return Ok(None);
        }

        Ok(Some(payload))
    }
}

/// Resolves visitor IPs to locations, degrading to an empty result
pub struct GeoResolver {
    enabled: bool,
    access_key: Option<String>,
    ttl: Option<Duration>,
    provider: Arc<dyn GeoProvider>,
    cache: CacheRegion<GeoLocation>,
}

impl GeoResolver {
    pub fn new(
        enabled: bool,
        config: &IpstackConfig,
        provider: Arc<dyn GeoProvider>,
        cache: CacheRegion<GeoLocation>,
    ) -> Self {
        Self {
            enabled,
            access_key: config.access_key.clone().filter(|k| !k.is_empty()),
            ttl: crate::cache::minutes_ttl(config.expire_minutes),
            provider,
            cache,
        }
    }

    pub async fn resolve(&self, ip: &str, iphash: &str) -> GeoLocation {
        let ip = ip.trim();
        if !self.enabled || ip.is_empty() {
            return GeoLocation::default();
        }
        let Some(access_key) = self.access_key.as_deref() else {
            return GeoLocation::default();
        };
        let Ok(addr) = ip.parse::<IpAddr>() else {
            debug!("skipping geolocation for unparseable client address");
            return GeoLocation::default();
        };

        if let Some(cached) = self.cache.get(iphash).await {
            return cached;
        }

        match self.provider.lookup(addr, access_key).await {
            Ok(Some(payload)) => {
                let location = into_location(strip_private_fields(payload));
                if !location.is_empty() {
                    self.cache.set(iphash, location.clone(), self.ttl).await;
                }
                location
            }
            Ok(None) => GeoLocation::default(),
            Err(e) => {
                warn!(error = %e, "geolocation lookup failed");
                // Same shape a provider would echo back, reduced to nothing once stripped
                let mut fallback = ProviderPayload::new();
                fallback.insert("ip".to_string(), Value::String(ip.to_string()));
                fallback.insert("hostname".to_string(), Value::String(ip.to_string()));
                into_location(strip_private_fields(fallback))
            }
        }
    }
}

/// Remove the fields that carry the plaintext address
pub fn strip_private_fields(mut payload: ProviderPayload) -> ProviderPayload {
    for field in PRIVATE_FIELDS {
        payload.remove(field);
    }
    payload
}

fn into_location(payload: ProviderPayload) -> GeoLocation {
    let text = |key: &str| {
        payload
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    GeoLocation {
        country_code: text("country_code"),
        country_name: text("country_name"),
        region: text("region_name"),
        city: text("city"),
    }
}
