//! Data models for campaign visit events

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Storage format of `visited_at`, local time
pub const VISITED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// UTM attribute keys, in column order
pub const UTM_KEYS: [&str; 5] = [
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
];

/// Raw request parameters; `None` stands for a null value
pub type RawParams = HashMap<String, Option<String>>;

/// Sanitized parameters: every value is non-empty
pub type CleanParams = BTreeMap<String, String>;

/// Geographic location resolved for a visitor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoLocation {
    /// ISO country code (e.g., "US", "GB")
    #[serde(default)]
    pub country_code: Option<String>,

    #[serde(default)]
    pub country_name: Option<String>,

    /// Region/state/province
    #[serde(default, alias = "region_name")]
    pub region: Option<String>,

    #[serde(default)]
    pub city: Option<String>,
}

impl GeoLocation {
    pub fn is_empty(&self) -> bool {
        self.country_code.is_none()
            && self.country_name.is_none()
            && self.region.is_none()
            && self.city.is_none()
    }
}

/// Coarse device class derived from the user-agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Mobile,
    Tablet,
    Desktop,
}

impl DeviceClass {
    /// Classify by substring, checking `mobile` before `tablet`
    pub fn from_user_agent(user_agent: &str) -> Self {
        let ua = user_agent.to_lowercase();
        if ua.contains("mobile") {
            DeviceClass::Mobile
        } else if ua.contains("tablet") {
            DeviceClass::Tablet
        } else {
            DeviceClass::Desktop
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::Mobile => "mobile",
            DeviceClass::Tablet => "tablet",
            DeviceClass::Desktop => "desktop",
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceClass {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mobile" => Ok(DeviceClass::Mobile),
            "tablet" => Ok(DeviceClass::Tablet),
            "desktop" => Ok(DeviceClass::Desktop),
            _ => Err(()),
        }
    }
}

/// One campaign visit, as persisted in the `utm` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UtmEvent {
    pub page_id: String,
    pub utm_source: String,
    pub utm_medium: String,
    pub utm_campaign: String,
    pub utm_term: String,
    pub utm_content: String,
    /// Local time, formatted with [`VISITED_AT_FORMAT`]
    pub visited_at: String,
    pub iphash: String,
    pub country_name: String,
    pub city: String,
    pub user_agent: String,
}

/// Fields the pipeline derives for every event
#[derive(Debug, Clone)]
pub struct GeneratedFields {
    pub visited_at: DateTime<Local>,
    pub iphash: String,
    pub country: String,
    pub city: String,
    pub device: DeviceClass,
}

impl UtmEvent {
    /// Merge generated fields with sanitized parameters
    ///
    /// Parameters named `visited_at`, `iphash`, `country`, `city` and
    /// `useragent` replace the generated value when they are valid.
    pub fn assemble(page_id: &str, generated: GeneratedFields, params: &CleanParams) -> Self {
        let utm = |key: &str| params.get(key).cloned().unwrap_or_default();

        let visited_at = params
            .get("visited_at")
            .and_then(|raw| parse_visited_at(raw))
            .unwrap_or_else(|| format_visited_at(&generated.visited_at));
        let device = params
            .get("useragent")
            .and_then(|raw| raw.parse::<DeviceClass>().ok())
            .unwrap_or(generated.device);

        Self {
            page_id: page_id.to_string(),
            utm_source: utm("utm_source"),
            utm_medium: utm("utm_medium"),
            utm_campaign: utm("utm_campaign"),
            utm_term: utm("utm_term"),
            utm_content: utm("utm_content"),
            visited_at,
            iphash: params.get("iphash").cloned().unwrap_or(generated.iphash),
            country_name: params.get("country").cloned().unwrap_or(generated.country),
            city: params.get("city").cloned().unwrap_or(generated.city),
            user_agent: device.as_str().to_string(),
        }
    }
}

/// Whether the parameters carry at least one UTM attribute
pub fn has_utm_signal(params: &CleanParams) -> bool {
    UTM_KEYS.iter().any(|key| params.contains_key(*key))
}

pub fn format_visited_at(at: &DateTime<Local>) -> String {
    at.format(VISITED_AT_FORMAT).to_string()
}

/// Accept either the storage format or unix seconds
fn parse_visited_at(raw: &str) -> Option<String> {
    if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, VISITED_AT_FORMAT) {
        return Some(parsed.format(VISITED_AT_FORMAT).to_string());
    }

    let secs = raw.parse::<i64>().ok()?;
    let utc = Utc.timestamp_opt(secs, 0).single()?;
    Some(format_visited_at(&utc.with_timezone(&Local)))
}

/// Fixed-window counter for one visitor hash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRecord {
    pub window_start: DateTime<Utc>,
    pub trials: u32,
}
