//! Wires the cache system the way a bot backend would at startup
//!
//! Run with:
//! ```text
//! RUST_LOG=taskcache=debug cargo run --example composition_root
//! ```

use anyhow::Result;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use taskcache::cache::{operations, task_tracker_rules};
use taskcache::jobs::{JobRequest, JobStatus};
use taskcache::{CacheSystem, SystemConfig};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "taskcache=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SystemConfig::from_env()?;
    let system = CacheSystem::init(config, task_tracker_rules()?)?;

    // Expensive report computed off the request path
    let job = JobRequest::new(|| {
        std::thread::sleep(Duration::from_millis(200));
        Ok(json!({ "open": 12, "done": 30 }))
    })
    .with_id("weekly-stats")
    .priority(1)
    .cache_as("task_statistics");

    let id = system.queue().submit(job).await?;
    info!("Submitted {}", id);

    let status = system.queue().wait_for(&id, Duration::from_secs(5)).await?;
    if status == JobStatus::Completed {
        info!("Statistics: {:?}", system.cache().get("task_statistics").await);
    }

    // A status change makes the statistics stale
    let mut ctx = HashMap::new();
    ctx.insert("client_id".to_string(), "7".to_string());
    let report = system
        .on_operation(operations::TASK_STATUS_CHANGE, Some(&ctx))
        .await;
    info!(
        "{} removed {} entries ({} patterns)",
        report.operation, report.keys_removed, report.patterns_applied
    );

    info!("Cache: {}", system.cache().stats().await);
    info!("Queue: {:?}", system.queue().stats().await);

    let shutdown = system.shutdown(Duration::from_secs(10)).await;
    info!("Shutdown: {:?}", shutdown);
    Ok(())
}
