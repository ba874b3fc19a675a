//! Core configuration types.
//!
//! TOML-deserializable settings for the shared store connection and the
//! resilience components. Every section defaults to the crate's documented
//! constants, so a minimal deployment only supplies the store URL:
//!
//! ```toml
//! store_url = "redis://cache.internal:6379"
//!
//! [rate_limit]
//! requests_per_minute = 120
//!
//! [circuit_breaker]
//! failure_threshold = 3
//! reset_timeout_secs = 30
//! ```

use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::{
    error::{CoreError, Result},
    reliability::CircuitBreakerConfig,
    security::RateLimitConfig,
};

/// Root configuration for the subscription core.
#[derive(Debug, Clone, Deserialize)]
pub struct CoreConfig {
    /// Shared counter store URL (`redis://` or `rediss://`).
    pub store_url: String,

    /// Cache settings.
    #[serde(default)]
    pub cache: CacheSettings,

    /// Rate limiter settings.
    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    /// Circuit breaker settings.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,

    /// Expiry sweeper settings.
    #[serde(default)]
    pub sweeper: SweeperSettings,
}

impl CoreConfig {
    /// Parses configuration from a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Config`] on malformed TOML; call
    /// [`validate`](Self::validate) afterwards for semantic checks.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| CoreError::Config(e.to_string()))
    }

    /// Validates semantic invariants the deserializer cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Config`] if the store URL is not a Redis URL or
    /// any threshold is zero.
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.store_url)
            .map_err(|e| CoreError::Config(format!("invalid store_url '{}': {e}", self.store_url)))?;
        if !matches!(url.scheme(), "redis" | "rediss") {
            return Err(CoreError::Config(format!(
                "store_url must use redis:// or rediss://, got: {}",
                url.scheme()
            )));
        }

        if self.cache.default_ttl_secs == 0 {
            return Err(CoreError::Config("cache.default_ttl_secs must be positive".to_owned()));
        }
        if self.rate_limit.requests_per_minute == 0 {
            return Err(CoreError::Config(
                "rate_limit.requests_per_minute must be positive".to_owned(),
            ));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(CoreError::Config(
                "circuit_breaker.failure_threshold must be positive".to_owned(),
            ));
        }
        if self.circuit_breaker.reset_timeout_secs == 0 {
            return Err(CoreError::Config(
                "circuit_breaker.reset_timeout_secs must be positive".to_owned(),
            ));
        }
        if self.sweeper.interval_secs == 0 {
            return Err(CoreError::Config("sweeper.interval_secs must be positive".to_owned()));
        }
        Ok(())
    }
}

/// Cache section.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CacheSettings {
    /// Default entry lifetime in seconds.
    ///
    /// Default: 300
    #[serde(default = "defaults::cache_ttl_secs")]
    pub default_ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { default_ttl_secs: defaults::cache_ttl_secs() }
    }
}

impl CacheSettings {
    /// Default TTL as a [`Duration`].
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

/// Rate limiter section.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RateLimitSettings {
    /// Requests admitted per identity per minute.
    ///
    /// Default: 60
    #[serde(default = "defaults::requests_per_minute")]
    pub requests_per_minute: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self { requests_per_minute: defaults::requests_per_minute() }
    }
}

impl From<RateLimitSettings> for RateLimitConfig {
    fn from(settings: RateLimitSettings) -> Self {
        Self { requests_per_minute: settings.requests_per_minute }
    }
}

/// Circuit breaker section.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CircuitBreakerSettings {
    /// Consecutive failures before the circuit opens.
    ///
    /// Default: 5
    #[serde(default = "defaults::failure_threshold")]
    pub failure_threshold: u64,

    /// Open period before a recovery probe, in seconds.
    ///
    /// Default: 60
    #[serde(default = "defaults::reset_timeout_secs")]
    pub reset_timeout_secs: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: defaults::failure_threshold(),
            reset_timeout_secs: defaults::reset_timeout_secs(),
        }
    }
}

impl From<CircuitBreakerSettings> for CircuitBreakerConfig {
    fn from(settings: CircuitBreakerSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold,
            reset_timeout: Duration::from_secs(settings.reset_timeout_secs),
        }
    }
}

/// Expiry sweeper section.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SweeperSettings {
    /// Interval between sweeps, in seconds.
    ///
    /// Default: 3600
    #[serde(default = "defaults::sweep_interval_secs")]
    pub interval_secs: u64,
}

impl Default for SweeperSettings {
    fn default() -> Self {
        Self { interval_secs: defaults::sweep_interval_secs() }
    }
}

impl SweeperSettings {
    /// Sweep interval as a [`Duration`].
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

mod defaults {
    pub(super) fn cache_ttl_secs() -> u64 {
        300
    }
    pub(super) fn requests_per_minute() -> u32 {
        60
    }
    pub(super) fn failure_threshold() -> u64 {
        5
    }
    pub(super) fn reset_timeout_secs() -> u64 {
        60
    }
    pub(super) fn sweep_interval_secs() -> u64 {
        3600
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = CoreConfig::from_toml_str(r#"store_url = "redis://localhost:6379""#).unwrap();
        config.validate().unwrap();

        assert_eq!(config.cache.default_ttl_secs, 300);
        assert_eq!(config.rate_limit.requests_per_minute, 60);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.reset_timeout_secs, 60);
        assert_eq!(config.sweeper.interval_secs, 3600);
    }

    #[test]
    fn test_sections_override_defaults() {
        let raw = r#"
            store_url = "rediss://cache.internal:6380"

            [rate_limit]
            requests_per_minute = 120

            [circuit_breaker]
            failure_threshold = 3
            reset_timeout_secs = 30

            [sweeper]
            interval_secs = 900
        "#;
        let config = CoreConfig::from_toml_str(raw).unwrap();
        config.validate().unwrap();

        assert_eq!(config.rate_limit.requests_per_minute, 120);
        let breaker: CircuitBreakerConfig = config.circuit_breaker.into();
        assert_eq!(breaker.failure_threshold, 3);
        assert_eq!(breaker.reset_timeout, Duration::from_secs(30));
        assert_eq!(config.sweeper.interval(), Duration::from_secs(900));
    }

    #[test]
    fn test_rejects_non_redis_url() {
        let config =
            CoreConfig::from_toml_str(r#"store_url = "http://localhost:6379""#).unwrap();
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn test_rejects_malformed_url() {
        let config = CoreConfig::from_toml_str(r#"store_url = "not a url""#).unwrap();
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn test_rejects_zero_thresholds() {
        let raw = r#"
            store_url = "redis://localhost:6379"

            [circuit_breaker]
            failure_threshold = 0
        "#;
        let config = CoreConfig::from_toml_str(raw).unwrap();
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        assert!(matches!(
            CoreConfig::from_toml_str("store_url = [broken"),
            Err(CoreError::Config(_))
        ));
    }
}
