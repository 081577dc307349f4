//! # Query Result Cache
//!
//! In-memory caching of read-view results, with rule-driven invalidation.
//!
//! ## Features
//!
//! - **TTL-Based Expiration**: checked lazily on read, plus an optional periodic sweep
//! - **LRU Eviction**: bounded entry count with O(1) recency updates
//! - **Typed Keys**: `namespace:operation[:params-hash]` keys and explicit match patterns
//! - **Automated Invalidation**: write operations map to the cached views they make stale
//! - **Cache-Aware Wrappers**: turn a fetch function into a cached callable
//!
//! ## Example
//!
//! ```rust
//! use taskcache::cache::{AutomatedCacheManager, CacheConfig, QueryCache};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> taskcache::Result<()> {
//! let config = CacheConfig::builder()
//!     .default_ttl(Duration::from_secs(60))
//!     .max_entries(10_000)
//!     .build();
//!
//! let cache = Arc::new(QueryCache::new(config)?);
//! cache.set("task_statistics", serde_json::json!({"open": 3})).await?;
//!
//! let mut manager = AutomatedCacheManager::new(cache.clone());
//! manager.register_rule("task_create", ["task_statistics", "list_tasks*"], "new task")?;
//!
//! manager.on_operation("task_create", None).await;
//! assert!(cache.get("task_statistics").await.is_none());
//! # Ok(())
//! # }
//! ```

pub mod cached;
pub mod config;
pub mod entry;
pub mod invalidation;
pub mod key;
pub mod rules;
pub mod store;
pub mod types;

pub use cached::Cached;
pub use config::{CacheConfig, CacheConfigBuilder};
pub use entry::CacheEntry;
pub use invalidation::{
    AutomatedCacheManager, InvalidationFailure, InvalidationReport, InvalidationRule,
    InvalidationTarget, ManagerStats, OperationContext, OperationType,
};
pub use key::{CacheKey, CacheKeyBuilder, KeyPattern};
pub use rules::{operations, task_tracker_rules};
pub use store::{start_auto_cleanup, QueryCache};
pub use types::CacheStats;
