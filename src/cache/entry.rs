//! Cache entry with TTL and access tracking

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A cached value with its expiry and last-access markers
///
/// Entries are never mutated in place apart from the access markers; a new
/// `set` for the same key replaces the whole entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    /// The cached value
    pub value: V,

    /// When the entry was written
    pub created_at: DateTime<Utc>,

    /// `created_at + ttl`; the entry is dead once `now > expires_at`
    pub expires_at: DateTime<Utc>,

    /// Last successful read (for LRU tracking)
    pub last_accessed_at: DateTime<Utc>,

    /// Number of successful reads
    pub access_count: u64,
}

impl<V> CacheEntry<V> {
    /// Create a new cache entry expiring after `ttl`
    pub fn new(value: V, ttl: Duration) -> Self {
        let now = Utc::now();
        // Out-of-range TTLs are treated as "a century"
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let expires_at = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            value,
            created_at: now,
            expires_at,
            last_accessed_at: now,
            access_count: 0,
        }
    }

    /// Check if the entry has expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Mark the entry as read
    pub fn mark_accessed(&mut self) {
        self.last_accessed_at = Utc::now();
        self.access_count += 1;
    }
}
