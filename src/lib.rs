//! # taskcache
//!
//! Caching and deferred-work layer for a task-tracking backend.
//!
//! ## Components
//!
//! - [`cache::QueryCache`]: in-memory TTL + LRU cache for read-view results
//! - [`cache::AutomatedCacheManager`]: maps write operations to the cached
//!   views they make stale and invalidates them
//! - [`jobs::BackgroundJobQueue`]: bounded priority queue executed by a
//!   worker pool, with polling for status and results
//! - [`system::CacheSystem`]: wires the three together with an explicit
//!   startup and shutdown
//!
//! ## Example
//!
//! ```no_run
//! use taskcache::cache::{operations, task_tracker_rules};
//! use taskcache::jobs::JobRequest;
//! use taskcache::system::{CacheSystem, SystemConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let system = CacheSystem::init(SystemConfig::from_env()?, task_tracker_rules()?)?;
//!
//!     let job = JobRequest::new(|| Ok(serde_json::json!({ "open": 12 })))
//!         .cache_as("task_statistics");
//!     let id = system.queue().submit(job).await?;
//!     system.queue().wait_for(&id, Duration::from_secs(5)).await?;
//!
//!     system.on_operation(operations::TASK_CREATE, None).await;
//!     system.shutdown(Duration::from_secs(10)).await;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod error;
pub mod jobs;
pub mod observer;
pub mod system;

pub use cache::{AutomatedCacheManager, CacheConfig, CacheKey, KeyPattern, QueryCache};
pub use error::{CacheError, Result};
pub use jobs::{BackgroundJobQueue, JobRequest, JobStatus, QueueConfig};
pub use observer::{CacheEvent, CacheObserver, MetricsObserver, NoopObserver, TracingObserver};
pub use system::{CacheSystem, SystemConfig};
