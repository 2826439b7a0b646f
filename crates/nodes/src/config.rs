//! Service configuration.
//!
//! [`ServiceConfig`] collects every tunable of the planning service. Values
//! come from [`ServiceConfig::default`] and may be overridden from the
//! environment with [`ServiceConfig::from_env`]; the composition root applies
//! CLI overrides on top and then calls [`ServiceConfig::validate`].

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use pipeline::{ModelName, RetryPolicy, StageName};
use thiserror::Error;

/// Model used when a request does not name one.
pub const DEFAULT_MODEL: &str = "meta-llama/llama-4-scout-17b-16e-instruct";

pub const ENV_RATE_LIMIT: &str = "PLANFORGE_RATE_LIMIT_PER_MINUTE";
pub const ENV_RATE_WINDOW_SECS: &str = "PLANFORGE_RATE_WINDOW_SECS";
pub const ENV_CACHE_ENABLED: &str = "PLANFORGE_CACHE_ENABLED";
pub const ENV_CACHE_TTL_SECS: &str = "PLANFORGE_CACHE_TTL_SECS";
pub const ENV_CACHE_CAPACITY: &str = "PLANFORGE_CACHE_CAPACITY";
pub const ENV_DEFAULT_MODEL: &str = "PLANFORGE_DEFAULT_MODEL";
pub const ENV_RETRY_MAX_ATTEMPTS: &str = "PLANFORGE_RETRY_MAX_ATTEMPTS";

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An environment variable was set but could not be parsed.
    #[error("Environment variable {name} has invalid value '{value}'")]
    InvalidValue { name: &'static str, value: String },

    /// A value parsed but is outside its allowed range.
    #[error("Invalid configuration: {0}")]
    OutOfRange(String),
}

/// Sliding-window admission limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Requests admitted per client key within one window.
    pub limit: u32,
    /// Length of the trailing window.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 60,
            window: Duration::from_secs(60),
        }
    }
}

/// Response cache settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// When `false`, every lookup misses and nothing is stored.
    pub enabled: bool,
    pub ttl: Duration,
    /// Maximum live entries.
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(300),
            capacity: 1_000,
        }
    }
}

/// Retry policies by stage. Stages without an override use the default.
#[derive(Debug, Clone, Default)]
pub struct StageRetryPolicies {
    default: RetryPolicy,
    overrides: HashMap<StageName, RetryPolicy>,
}

impl StageRetryPolicies {
    pub fn new(default: RetryPolicy) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    /// Returns a copy where `stage` uses `policy`.
    #[must_use]
    pub fn with_stage(mut self, stage: StageName, policy: RetryPolicy) -> Self {
        self.overrides.insert(stage, policy);
        self
    }

    pub fn for_stage(&self, stage: StageName) -> &RetryPolicy {
        self.overrides.get(&stage).unwrap_or(&self.default)
    }

    pub fn default_policy(&self) -> &RetryPolicy {
        &self.default
    }

    /// Replaces the fallback policy, keeping the overrides.
    pub fn set_default(&mut self, policy: RetryPolicy) {
        self.default = policy;
    }
}

/// Every tunable of the planning service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub rate_limit: RateLimitConfig,
    pub cache: CacheConfig,
    /// Model used when a request names none.
    pub default_model: ModelName,
    /// Retry policy for each stage's completion calls.
    pub retry: StageRetryPolicies,
    /// How often the background sweeps purge idle windows and expired
    /// entries.
    pub maintenance_interval: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            cache: CacheConfig::default(),
            default_model: ModelName::new(DEFAULT_MODEL)
                .unwrap_or_else(|| unreachable!("default model name is non-empty")),
            retry: StageRetryPolicies::default(),
            maintenance_interval: Duration::from_secs(60),
        }
    }
}

impl ServiceConfig {
    /// Defaults overridden by any `PLANFORGE_*` environment variables that
    /// are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(limit) = parse_var::<u32, _>(&lookup, ENV_RATE_LIMIT)? {
            config.rate_limit.limit = limit;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, ENV_RATE_WINDOW_SECS)? {
            config.rate_limit.window = Duration::from_secs(secs);
        }
        if let Some(raw) = lookup(ENV_CACHE_ENABLED) {
            config.cache.enabled = parse_bool(&raw).ok_or(ConfigError::InvalidValue {
                name: ENV_CACHE_ENABLED,
                value: raw,
            })?;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, ENV_CACHE_TTL_SECS)? {
            config.cache.ttl = Duration::from_secs(secs);
        }
        if let Some(capacity) = parse_var::<usize, _>(&lookup, ENV_CACHE_CAPACITY)? {
            config.cache.capacity = capacity;
        }
        if let Some(raw) = lookup(ENV_DEFAULT_MODEL) {
            config.default_model = ModelName::new(raw.clone()).ok_or(ConfigError::InvalidValue {
                name: ENV_DEFAULT_MODEL,
                value: raw,
            })?;
        }

        if let Some(attempts) = parse_var::<u32, _>(&lookup, ENV_RETRY_MAX_ATTEMPTS)? {
            if attempts == 0 {
                return Err(ConfigError::InvalidValue {
                    name: ENV_RETRY_MAX_ATTEMPTS,
                    value: attempts.to_string(),
                });
            }
            let policy = config.retry.default_policy().clone().with_max_attempts(attempts);
            config.retry.set_default(policy);
        }

        Ok(config)
    }

    /// Rejects settings the service cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit.limit == 0 {
            return Err(ConfigError::OutOfRange("rate limit must be at least 1".into()));
        }
        if self.rate_limit.window.is_zero() {
            return Err(ConfigError::OutOfRange("rate window must be non-zero".into()));
        }
        if self.cache.enabled && self.cache.capacity == 0 {
            return Err(ConfigError::OutOfRange(
                "cache capacity must be at least 1 when the cache is enabled".into(),
            ));
        }
        if self.cache.enabled && self.cache.ttl.is_zero() {
            return Err(ConfigError::OutOfRange("cache TTL must be non-zero".into()));
        }
        if self.maintenance_interval.is_zero() {
            return Err(ConfigError::OutOfRange(
                "maintenance interval must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
