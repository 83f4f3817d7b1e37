use std::num::NonZeroU32;
use std::time::Duration;

use serde::Deserialize;

/// Middleware chain configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MiddlewareConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    #[serde(default)]
    pub cache: Option<CacheConfig>,
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

/// Request logging
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

const fn default_true() -> bool {
    true
}

/// Retry with exponential backoff
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay", deserialize_with = "crate::duration::deserialize")]
    pub initial_delay: Duration,
    #[serde(default = "default_max_delay", deserialize_with = "crate::duration::deserialize")]
    pub max_delay: Duration,
    /// Add random jitter to each delay
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            jitter: true,
        }
    }
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_initial_delay() -> Duration {
    Duration::from_millis(500)
}

const fn default_max_delay() -> Duration {
    Duration::from_secs(8)
}

/// Response cache for deterministic requests
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Maximum cached responses
    #[serde(default = "default_capacity")]
    pub capacity: u64,
    #[serde(default = "default_ttl", deserialize_with = "crate::duration::deserialize")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            ttl: default_ttl(),
        }
    }
}

const fn default_capacity() -> u64 {
    1000
}

const fn default_ttl() -> Duration {
    Duration::from_secs(300)
}

/// Client-side request rate limit
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Requests allowed per window
    pub requests: NonZeroU32,
    #[serde(deserialize_with = "crate::duration::deserialize")]
    pub window: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_section_uses_defaults() {
        let config: MiddlewareConfig = toml::from_str("").unwrap();
        assert!(config.logging.enabled);
        assert!(config.retry.is_none());
        assert!(config.cache.is_none());
        assert!(config.rate_limit.is_none());
    }

    #[test]
    fn deserialize_all_middleware() {
        let toml = r#"
            [logging]
            enabled = false

            [retry]
            max_retries = 5
            initial_delay = "100ms"
            jitter = false

            [cache]
            ttl = "1m"

            [rate_limit]
            requests = 60
            window = "1m"
        "#;

        let config: MiddlewareConfig = toml::from_str(toml).unwrap();
        assert!(!config.logging.enabled);

        let retry = config.retry.unwrap();
        assert_eq!(retry.max_retries, 5);
        assert_eq!(retry.initial_delay, Duration::from_millis(100));
        assert_eq!(retry.max_delay, Duration::from_secs(8));
        assert!(!retry.jitter);

        let cache = config.cache.unwrap();
        assert_eq!(cache.capacity, 1000);
        assert_eq!(cache.ttl, Duration::from_secs(60));

        let rate_limit = config.rate_limit.unwrap();
        assert_eq!(rate_limit.requests.get(), 60);
        assert_eq!(rate_limit.window, Duration::from_secs(60));
    }

    #[test]
    fn zero_rate_limit_is_rejected() {
        assert!(toml::from_str::<RateLimitConfig>("requests = 0\nwindow = \"1s\"").is_err());
    }
}
