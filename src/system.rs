//! Composition root
//!
//! [`CacheSystem`] owns one query cache, the invalidation manager bound to
//! it, and a job queue whose results can land in the same cache. Build it
//! once at startup with [`CacheSystem::init`] and stop it with
//! [`CacheSystem::shutdown`].

use crate::cache::{
    start_auto_cleanup, AutomatedCacheManager, CacheConfig, InvalidationReport, InvalidationRule,
    OperationContext, QueryCache,
};
use crate::error::{CacheError, Result};
use crate::jobs::{BackgroundJobQueue, JobValue, QueueConfig, ShutdownReport};
use crate::observer::{CacheObserver, TracingObserver};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

/// Cache used by the system: job results and read views share it
pub type SharedCache = QueryCache<JobValue>;

/// Configuration for the whole subsystem
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemConfig {
    pub cache: CacheConfig,
    pub queue: QueueConfig,
}

impl SystemConfig {
    /// Load from `TASKCACHE_*` environment variables
    ///
    /// A `.env` file in the working directory is read first if present.
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let cache = &mut config.cache;
        let queue = &mut config.queue;

        if let Some(max) = parse_var(&lookup, "TASKCACHE_MAX_ENTRIES")? {
            cache.max_entries = max;
        }
        if let Some(secs) = parse_var(&lookup, "TASKCACHE_DEFAULT_TTL_SECS")? {
            cache.default_ttl = Duration::from_secs(secs);
        }
        if let Some(jitter) = parse_var(&lookup, "TASKCACHE_TTL_JITTER")? {
            cache.ttl_jitter = jitter;
        }
        if let Some(secs) = parse_var(&lookup, "TASKCACHE_CLEANUP_INTERVAL_SECS")? {
            cache.cleanup_interval = Duration::from_secs(secs);
        }
        if let Some(workers) = parse_var(&lookup, "TASKCACHE_WORKERS")? {
            queue.workers = workers;
        }
        if let Some(capacity) = parse_var(&lookup, "TASKCACHE_QUEUE_CAPACITY")? {
            queue.capacity = capacity;
        }
        if let Some(ms) = parse_var(&lookup, "TASKCACHE_ENQUEUE_TIMEOUT_MS")? {
            queue.enqueue_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var(&lookup, "TASKCACHE_RESULT_TTL_SECS")? {
            queue.result_ttl = Duration::from_secs(secs);
        }
        if let Some(max) = parse_var(&lookup, "TASKCACHE_MAX_RETAINED_RESULTS")? {
            queue.max_retained_results = max;
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.queue.validate()
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };

    raw.trim()
        .parse()
        .map(Some)
        .map_err(|e| CacheError::Config(format!("{}={:?}: {}", name, raw, e)))
}

/// The wired-up cache, invalidation manager and job queue
pub struct CacheSystem {
    cache: Arc<SharedCache>,
    manager: Arc<AutomatedCacheManager<SharedCache>>,
    queue: BackgroundJobQueue,
    observer: Arc<dyn CacheObserver>,
    cleanup: Option<JoinHandle<()>>,
}

impl CacheSystem {
    /// Build the subsystem, reporting events to `tracing`
    ///
    /// Must be called inside a tokio runtime.
    pub fn init(config: SystemConfig, rules: Vec<InvalidationRule>) -> Result<Self> {
        Self::init_with_observer(config, rules, Arc::new(TracingObserver))
    }

    /// Build the subsystem with a custom event sink
    pub fn init_with_observer(
        config: SystemConfig,
        rules: Vec<InvalidationRule>,
        observer: Arc<dyn CacheObserver>,
    ) -> Result<Self> {
        config.validate()?;

        let cache = Arc::new(QueryCache::with_observer(config.cache, observer.clone())?);
        let cleanup = start_auto_cleanup(&cache);

        let rule_count = rules.len();
        let manager = Arc::new(
            AutomatedCacheManager::with_observer(cache.clone(), observer.clone()).with_rules(rules),
        );

        let queue =
            BackgroundJobQueue::start_with(config.queue, observer.clone(), Some(cache.clone()))?;

        info!(
            "Cache system started ({} invalidation rules, {} workers)",
            rule_count,
            queue.config().workers
        );

        Ok(Self {
            cache,
            manager,
            queue,
            observer,
            cleanup,
        })
    }

    pub fn cache(&self) -> &Arc<SharedCache> {
        &self.cache
    }

    pub fn manager(&self) -> &Arc<AutomatedCacheManager<SharedCache>> {
        &self.manager
    }

    pub fn queue(&self) -> &BackgroundJobQueue {
        &self.queue
    }

    pub fn observer(&self) -> &Arc<dyn CacheObserver> {
        &self.observer
    }

    /// Report a write so the views it affects are invalidated
    pub async fn on_operation(
        &self,
        operation_type: &str,
        context: Option<&OperationContext>,
    ) -> InvalidationReport {
        self.manager.on_operation(operation_type, context).await
    }

    /// Drain the queue, then stop the cache sweeper
    pub async fn shutdown(mut self, timeout: Duration) -> ShutdownReport {
        let report = self.queue.shutdown(timeout).await;

        if let Some(cleanup) = self.cleanup.take() {
            cleanup.abort();
        }

        let stats = self.cache.stats().await;
        info!("Cache system stopped ({})", stats);
        report
    }
}
