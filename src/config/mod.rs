use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Master switch for ingestion and queries
    pub enabled: bool,
    /// Path of the SQLite file holding the `utm` table
    pub file: PathBuf,
    /// Fixed client IP used instead of the request's address (testing only)
    pub ip: Option<String>,
    /// Salt prepended to the client IP before hashing
    pub salt: String,
    pub ipstack: IpstackConfig,
    pub ratelimit: RateLimitConfig,
    /// Default day window for period-over-period stats
    pub stats_range_days: u32,
    /// Flush every cache region when the tracker is constructed
    pub debug: bool,
    /// Maximum entries per cache region
    pub cache_capacity: u64,
    pub server: ServerConfig,
    pub proxy: ProxyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpstackConfig {
    pub access_key: Option<String>,
    pub https: bool,
    pub endpoint: String,
    /// Cache lifetime of a resolved location; 0 keeps entries until evicted
    pub expire_minutes: u64,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub window_minutes: u64,
    pub trials: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustedProxyMode {
    None,
    Standard,
    Cloudflare,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub mode: TrustedProxyMode,
    /// Number of trusted hops to skip from the right of X-Forwarded-For
    #[serde(default)]
    pub num_trusted_proxies: Option<usize>,
}

impl IpstackConfig {
    pub fn scheme(&self) -> &'static str {
        if self.https {
            "https"
        } else {
            "http"
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            file: PathBuf::from("./utm.sqlite"),
            ip: None,
            salt: "utm-tracker".to_string(),
            ipstack: IpstackConfig {
                access_key: None,
                https: true,
                endpoint: "api.ipstack.com".to_string(),
                expire_minutes: 1440,
                timeout_secs: 5,
            },
            ratelimit: RateLimitConfig {
                enabled: true,
                window_minutes: 60,
                trials: 60,
            },
            stats_range_days: 30,
            debug: false,
            cache_capacity: 10_000,
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            proxy: ProxyConfig {
                mode: TrustedProxyMode::None,
                num_trusted_proxies: None,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();

        let enabled = env_flag("UTM_ENABLED", defaults.enabled);
        let file = std::env::var("UTM_SQLITE_FILE")
            .map(PathBuf::from)
            .unwrap_or(defaults.file);
        let ip = env_non_empty("UTM_IP");
        let salt = env_non_empty("UTM_SALT").unwrap_or(defaults.salt);

        let ipstack = IpstackConfig {
            access_key: env_non_empty("UTM_IPSTACK_ACCESS_KEY"),
            https: env_flag("UTM_IPSTACK_HTTPS", defaults.ipstack.https),
            endpoint: env_non_empty("UTM_IPSTACK_ENDPOINT").unwrap_or(defaults.ipstack.endpoint),
            expire_minutes: env_parse("UTM_IPSTACK_EXPIRE", defaults.ipstack.expire_minutes)?,
            timeout_secs: env_parse("UTM_IPSTACK_TIMEOUT_SECS", defaults.ipstack.timeout_secs)?,
        };

        let ratelimit = RateLimitConfig {
            enabled: env_flag("UTM_RATELIMIT_ENABLED", defaults.ratelimit.enabled),
            window_minutes: env_parse("UTM_RATELIMIT_DURATION", defaults.ratelimit.window_minutes)?,
            trials: env_parse("UTM_RATELIMIT_TRIALS", defaults.ratelimit.trials)?,
        };

        let mode = match std::env::var("TRUSTED_PROXY_MODE")
            .unwrap_or_else(|_| "none".to_string())
            .to_lowercase()
            .as_str()
        {
            "none" => TrustedProxyMode::None,
            "standard" => TrustedProxyMode::Standard,
            "cloudflare" => TrustedProxyMode::Cloudflare,
            other => {
                tracing::warn!(
                    "Unknown TRUSTED_PROXY_MODE '{other}', falling back to 'none'. Supported values: none, standard, cloudflare"
                );
                TrustedProxyMode::None
            }
        };
        let num_trusted_proxies = match env_non_empty("NUM_TRUSTED_PROXIES") {
            Some(raw) => Some(
                raw.parse::<usize>()
                    .context("NUM_TRUSTED_PROXIES must be a non-negative integer")?,
            ),
            None => None,
        };

        Ok(Config {
            enabled,
            file,
            ip,
            salt,
            ipstack,
            ratelimit,
            stats_range_days: env_parse("UTM_STATS_RANGE", defaults.stats_range_days)?,
            debug: env_flag("UTM_DEBUG", defaults.debug),
            cache_capacity: env_parse("UTM_CACHE_CAPACITY", defaults.cache_capacity)?,
            server: ServerConfig {
                host: std::env::var("HOST").unwrap_or(defaults.server.host),
                port: env_parse("PORT", defaults.server.port)?,
            },
            proxy: ProxyConfig {
                mode,
                num_trusted_proxies,
            },
        })
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_flag(key: &str, default: bool) -> bool {
    env_non_empty(key)
        .map(|v| parse_flag(&v))
        .unwrap_or(default)
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

fn env_parse<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env_non_empty(key) {
        Some(raw) => raw
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value '{raw}'")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("true"));
        assert!(parse_flag("YES"));
        assert!(parse_flag("1"));
        assert!(parse_flag("on"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag("0"));
        assert!(!parse_flag("nope"));
    }

    #[test]
    fn test_scheme_follows_https_flag() {
        let mut config = Config::default();
        assert_eq!(config.ipstack.scheme(), "https");
        config.ipstack.https = false;
        assert_eq!(config.ipstack.scheme(), "http");
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.enabled);
        assert!(config.ratelimit.enabled);
        assert_eq!(config.ratelimit.trials, 60);
        assert_eq!(config.ipstack.access_key, None);
        assert_eq!(config.proxy.mode, TrustedProxyMode::None);
    }
}
