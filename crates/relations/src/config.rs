//! Relationship engine configuration
//!
//! Defaults are usable as-is; every setting can be overridden from the
//! environment with an `ELIF_RELATIONS_` prefixed variable.

use std::env;
use std::time::Duration;

use crate::error::ConfigError;

/// Configuration for the longer-lived instance cache
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceCacheConfig {
    /// Whether relation snapshots are shared across sessions
    pub enabled: bool,
    /// Maximum number of cached (entity, field) snapshots
    pub max_entries: usize,
    /// Time to live for a cached snapshot
    pub ttl: Option<Duration>,
}

impl Default for InstanceCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 10_000,
            ttl: Some(Duration::from_secs(300)), // 5 minutes
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RelationsConfig {
    pub instance_cache: InstanceCacheConfig,
    /// Buffer to-many mutations on unloaded fields instead of loading first
    pub defer_unloaded_mutations: bool,
    /// Emit every storage statement at debug level
    pub log_statements: bool,
}

impl RelationsConfig {
    pub fn new() -> Self {
        Self {
            instance_cache: InstanceCacheConfig::default(),
            defer_unloaded_mutations: true,
            log_statements: false,
        }
    }

    /// Configuration for tests: no shared cache, statements logged
    pub fn testing() -> Self {
        Self {
            instance_cache: InstanceCacheConfig {
                enabled: false,
                ..InstanceCacheConfig::default()
            },
            defer_unloaded_mutations: true,
            log_statements: true,
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::new();

        if let Ok(value) = env::var("ELIF_RELATIONS_CACHE_ENABLED") {
            config.instance_cache.enabled = parse_bool("ELIF_RELATIONS_CACHE_ENABLED", &value)?;
        }

        if let Ok(value) = env::var("ELIF_RELATIONS_CACHE_MAX_ENTRIES") {
            config.instance_cache.max_entries =
                value.parse().map_err(|_| ConfigError::InvalidValue {
                    field: "ELIF_RELATIONS_CACHE_MAX_ENTRIES".to_string(),
                    value: value.clone(),
                    expected: "non-negative integer".to_string(),
                })?;
        }

        if let Ok(value) = env::var("ELIF_RELATIONS_CACHE_TTL_SECS") {
            let secs: u64 = value.parse().map_err(|_| ConfigError::InvalidValue {
                field: "ELIF_RELATIONS_CACHE_TTL_SECS".to_string(),
                value: value.clone(),
                expected: "number of seconds (0 disables expiry)".to_string(),
            })?;
            config.instance_cache.ttl = (secs > 0).then(|| Duration::from_secs(secs));
        }

        if let Ok(value) = env::var("ELIF_RELATIONS_DEFER_UNLOADED") {
            config.defer_unloaded_mutations = parse_bool("ELIF_RELATIONS_DEFER_UNLOADED", &value)?;
        }

        if let Ok(value) = env::var("ELIF_RELATIONS_LOG_STATEMENTS") {
            config.log_statements = parse_bool("ELIF_RELATIONS_LOG_STATEMENTS", &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instance_cache.enabled && self.instance_cache.max_entries == 0 {
            return Err(ConfigError::ValidationFailed {
                field: "instance_cache.max_entries".to_string(),
                reason: "must be greater than zero when the instance cache is enabled".to_string(),
            });
        }

        if self.instance_cache.ttl == Some(Duration::ZERO) {
            return Err(ConfigError::ValidationFailed {
                field: "instance_cache.ttl".to_string(),
                reason: "use None to disable expiry".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for RelationsConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            expected: "true or false".to_string(),
        }),
    }
}
