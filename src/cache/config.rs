//! Configuration for the query cache

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the query cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL used by `set` when no explicit TTL is given
    pub default_ttl: Duration,

    /// Maximum number of entries in the cache
    /// Inserting beyond this evicts the least recently used entry
    pub max_entries: usize,

    /// TTL jitter factor (0.0 - 1.0)
    /// Spreads default-TTL expiries so entries written together do not
    /// expire together. Explicit TTLs are never jittered.
    pub ttl_jitter: f64,

    /// Enable the periodic sweep of expired entries
    pub enable_auto_cleanup: bool,

    /// Interval between sweeps
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(3600),
            max_entries: 10_000,
            ttl_jitter: 0.0,
            enable_auto_cleanup: true,
            // Sweep every 5 minutes
            cleanup_interval: Duration::from_secs(300),
        }
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(CacheError::invalid("max_entries must be greater than 0"));
        }

        if self.default_ttl.is_zero() {
            return Err(CacheError::invalid("default_ttl must be positive"));
        }

        if !(0.0..=1.0).contains(&self.ttl_jitter) {
            return Err(CacheError::invalid("ttl_jitter must be between 0.0 and 1.0"));
        }

        if self.enable_auto_cleanup && self.cleanup_interval.is_zero() {
            return Err(CacheError::invalid("cleanup_interval must be positive"));
        }

        Ok(())
    }

    /// Default TTL with jitter applied
    pub fn ttl_with_jitter(&self) -> Duration {
        if self.ttl_jitter == 0.0 {
            return self.default_ttl;
        }

        let base_secs = self.default_ttl.as_secs_f64();
        let jitter_range = base_secs * self.ttl_jitter;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        // Never jitter an entry into immediate expiry
        let final_secs = (base_secs + jitter).max(base_secs * 0.5);

        Duration::from_secs_f64(final_secs)
    }
}

/// Builder for cache configuration
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    default_ttl: Option<Duration>,
    max_entries: Option<usize>,
    ttl_jitter: Option<f64>,
    enable_auto_cleanup: Option<bool>,
    cleanup_interval: Option<Duration>,
}

impl CacheConfigBuilder {
    /// Set default TTL for cache entries
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Set maximum number of cache entries
    pub fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    /// Set TTL jitter factor (0.0 - 1.0)
    pub fn ttl_jitter(mut self, jitter: f64) -> Self {
        self.ttl_jitter = Some(jitter);
        self
    }

    /// Enable or disable the periodic sweep
    pub fn enable_auto_cleanup(mut self, enable: bool) -> Self {
        self.enable_auto_cleanup = Some(enable);
        self
    }

    /// Set cleanup interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        CacheConfig {
            default_ttl: self.default_ttl.unwrap_or(defaults.default_ttl),
            max_entries: self.max_entries.unwrap_or(defaults.max_entries),
            ttl_jitter: self.ttl_jitter.unwrap_or(defaults.ttl_jitter),
            enable_auto_cleanup: self
                .enable_auto_cleanup
                .unwrap_or(defaults.enable_auto_cleanup),
            cleanup_interval: self.cleanup_interval.unwrap_or(defaults.cleanup_interval),
        }
    }
}

/// Preset configurations for common use cases
impl CacheConfig {
    /// Short TTL for rapidly changing data
    pub fn realtime() -> Self {
        Self {
            default_ttl: Duration::from_secs(60),
            max_entries: 5_000,
            ttl_jitter: 0.10,
            cleanup_interval: Duration::from_secs(30),
            ..Default::default()
        }
    }

    /// Memory-constrained environments
    pub fn small() -> Self {
        Self {
            default_ttl: Duration::from_secs(600),
            max_entries: 500,
            ..Default::default()
        }
    }

    /// Many long-lived views
    pub fn large() -> Self {
        Self {
            default_ttl: Duration::from_secs(7200),
            max_entries: 1_000_000,
            ttl_jitter: 0.10,
            ..Default::default()
        }
    }
}
