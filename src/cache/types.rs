//! Statistics for the query cache

use serde::{Deserialize, Serialize};
use std::fmt;

/// Counters for cache performance monitoring
///
/// Every field except `entry_count` only ever grows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Total number of cache hits
    pub hits: u64,

    /// Total number of cache misses (absent or expired)
    pub misses: u64,

    /// Entries dropped by the LRU policy
    pub evictions: u64,

    /// Entries dropped because their TTL elapsed
    pub expirations: u64,

    /// Entries removed by `invalidate` / `invalidate_prefix`
    pub invalidations: u64,

    /// Number of entries currently in cache
    pub entry_count: usize,
}

impl CacheStats {
    /// Cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Total lookups served
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ hits: {}, misses: {}, hit_rate: {:.2}%, entries: {}, evictions: {}, expirations: {}, invalidations: {} }}",
            self.hits,
            self.misses,
            self.hit_rate(),
            self.entry_count,
            self.evictions,
            self.expirations,
            self.invalidations
        )
    }
}
