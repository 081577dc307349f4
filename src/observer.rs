//! Observability hook
//!
//! The cache, the invalidation engine and the job queue report what they do
//! as [`CacheEvent`]s to a pluggable [`CacheObserver`]. The host decides where
//! events go; [`TracingObserver`] is the default sink.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Something observable happened inside the subsystem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheEvent {
    /// Read served from the cache
    Hit { key: String },

    /// Read found nothing usable
    Miss { key: String },

    /// Entry dropped to make room for a new one
    Evicted { key: String },

    /// Entry dropped because its TTL elapsed
    Expired { key: String },

    /// An operation type invalidated cached views
    Invalidated {
        operation: String,
        keys_removed: usize,
    },

    /// A pattern could not be invalidated
    InvalidationFailed {
        operation: String,
        pattern: String,
        error: String,
    },

    /// A background job produced a result
    JobCompleted { job_id: String, elapsed: Duration },

    /// A background job failed (error, panic, or shutdown)
    JobFailed { job_id: String, error: String },

    /// A submission was refused
    JobRejected { job_id: String, reason: String },
}

/// Sink for [`CacheEvent`]s
///
/// Implementations are called outside of internal locks but on the hot path,
/// so they should return quickly.
pub trait CacheObserver: Send + Sync {
    fn on_event(&self, event: &CacheEvent);
}

/// Forwards events to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl CacheObserver for TracingObserver {
    fn on_event(&self, event: &CacheEvent) {
        match event {
            CacheEvent::Hit { key } => debug!("Cache hit: {}", key),
            CacheEvent::Miss { key } => debug!("Cache miss: {}", key),
            CacheEvent::Evicted { key } => debug!("Evicted cache entry: {}", key),
            CacheEvent::Expired { key } => debug!("Cache entry expired: {}", key),
            CacheEvent::Invalidated {
                operation,
                keys_removed,
            } => info!("Operation {} invalidated {} entries", operation, keys_removed),
            CacheEvent::InvalidationFailed {
                operation,
                pattern,
                error,
            } => warn!(
                "Invalidation of '{}' for operation {} failed: {}",
                pattern, operation, error
            ),
            CacheEvent::JobCompleted { job_id, elapsed } => {
                debug!("Job {} completed in {:?}", job_id, elapsed)
            }
            CacheEvent::JobFailed { job_id, error } => warn!("Job {} failed: {}", job_id, error),
            CacheEvent::JobRejected { job_id, reason } => {
                warn!("Job {} rejected: {}", job_id, reason)
            }
        }
    }
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl CacheObserver for NoopObserver {
    fn on_event(&self, _event: &CacheEvent) {}
}

/// Counts events with atomics
#[derive(Debug, Default)]
pub struct MetricsObserver {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    invalidations: AtomicU64,
    invalidation_failures: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_rejected: AtomicU64,
}

/// Point-in-time copy of a [`MetricsObserver`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub invalidations: u64,
    pub invalidation_failures: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_rejected: u64,
}

impl MetricsObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            invalidation_failures: self.invalidation_failures.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_rejected: self.jobs_rejected.load(Ordering::Relaxed),
        }
    }
}

impl CacheObserver for MetricsObserver {
    fn on_event(&self, event: &CacheEvent) {
        let counter = match event {
            CacheEvent::Hit { .. } => &self.hits,
            CacheEvent::Miss { .. } => &self.misses,
            CacheEvent::Evicted { .. } => &self.evictions,
            CacheEvent::Expired { .. } => &self.expirations,
            CacheEvent::Invalidated { .. } => &self.invalidations,
            CacheEvent::InvalidationFailed { .. } => &self.invalidation_failures,
            CacheEvent::JobCompleted { .. } => &self.jobs_completed,
            CacheEvent::JobFailed { .. } => &self.jobs_failed,
            CacheEvent::JobRejected { .. } => &self.jobs_rejected,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
