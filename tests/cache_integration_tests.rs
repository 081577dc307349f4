//! Integration tests for the query cache and the invalidation manager
//!
//! These tests cover:
//! - LRU eviction under a tight entry bound
//! - TTL expiration without explicit invalidation
//! - Rule-driven invalidation for task-tracker writes
//! - Concurrent access from many tasks

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use taskcache::cache::{
    operations, task_tracker_rules, AutomatedCacheManager, CacheConfig, CacheKey, KeyPattern,
    QueryCache,
};
use taskcache::{CacheError, MetricsObserver};

fn cache_with(max_entries: usize, ttl: Duration) -> QueryCache<i32> {
    let config = CacheConfig::builder()
        .default_ttl(ttl)
        .max_entries(max_entries)
        .enable_auto_cleanup(false)
        .build();
    QueryCache::new(config).unwrap()
}

#[tokio::test]
async fn test_oldest_entry_evicted_when_full() {
    let cache = cache_with(2, Duration::from_secs(60));

    cache.set("a", 1).await.unwrap();
    cache.set("b", 2).await.unwrap();
    cache.set("c", 3).await.unwrap();

    assert_eq!(cache.get("a").await, None);
    assert_eq!(cache.get("b").await, Some(2));
    assert_eq!(cache.get("c").await, Some(3));
    assert_eq!(cache.stats().await.evictions, 1);
}

#[tokio::test]
async fn test_lru_keeps_most_recently_used() {
    let cache = cache_with(3, Duration::from_secs(60));

    for (i, key) in ["k1", "k2", "k3"].iter().enumerate() {
        cache.set(*key, i as i32).await.unwrap();
    }

    // k1 becomes most recently used, so k2 is the true LRU
    cache.get("k1").await;
    cache.set("k4", 4).await.unwrap();

    assert!(cache.contains_key("k1").await);
    assert!(!cache.contains_key("k2").await);
    assert!(cache.contains_key("k3").await);
    assert!(cache.contains_key("k4").await);
    assert_eq!(cache.len().await, 3);

    // Overwriting an existing key never evicts
    cache.set("k3", 30).await.unwrap();
    assert_eq!(cache.len().await, 3);
    assert_eq!(cache.stats().await.evictions, 1);
}

#[tokio::test]
async fn test_ttl_expiration() {
    let cache = cache_with(10, Duration::from_millis(100));

    cache.set("expiring", 1).await.unwrap();
    cache
        .set_with_ttl("lasting", 2, Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(cache.get("expiring").await, Some(1));

    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(cache.get("expiring").await, None);
    assert_eq!(cache.get("lasting").await, Some(2));

    let stats = cache.stats().await;
    assert_eq!(stats.expirations, 1);
    assert_eq!(stats.entry_count, 1);
}

#[tokio::test]
async fn test_zero_ttl_rejected() {
    let cache = cache_with(10, Duration::from_secs(60));
    let err = cache
        .set_with_ttl("k", 1, Duration::ZERO)
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::InvalidArgument(_)));
    assert!(cache.is_empty().await);
}

#[tokio::test]
async fn test_invalidate_is_idempotent() {
    let cache = cache_with(10, Duration::from_secs(60));
    cache.set("k", 1).await.unwrap();

    assert!(cache.invalidate("k").await);
    assert!(!cache.invalidate("k").await);
    assert_eq!(cache.get("k").await, None);
}

#[tokio::test]
async fn test_task_create_invalidates_registered_views() {
    let cache = Arc::new(cache_with(100, Duration::from_secs(60)));
    cache.set("list_incomplete_tasks", 1).await.unwrap();
    cache.set("task_statistics", 2).await.unwrap();
    cache.set("client_list", 3).await.unwrap();

    let mut manager = AutomatedCacheManager::new(cache.clone());
    manager
        .register_rule(
            "task_create",
            ["list_incomplete_tasks", "task_statistics"],
            "New task",
        )
        .unwrap();

    let report = manager.on_operation("task_create", None).await;

    assert!(report.matched_rule);
    assert_eq!(report.keys_removed, 2);
    assert!(report.is_clean());
    assert!(!cache.contains_key("list_incomplete_tasks").await);
    assert!(!cache.contains_key("task_statistics").await);
    assert!(cache.contains_key("client_list").await);
}

#[tokio::test]
async fn test_rules_evict_only_matching_keys() {
    let cache = Arc::new(cache_with(100, Duration::from_secs(60)));
    let manager = AutomatedCacheManager::new(cache.clone()).with_rules(task_tracker_rules().unwrap());

    for key in [
        "client_list",
        "client_detail:7",
        "client_tasks:7",
        "task_detail:1",
        "task_statistics",
        "list_tasks:open",
    ] {
        cache.set(key, 0).await.unwrap();
    }

    manager.on_operation(operations::CLIENT_UPDATE, None).await;

    let mut remaining = cache.keys().await;
    remaining.sort();
    assert_eq!(
        remaining,
        vec!["client_tasks:7", "list_tasks:open", "task_detail:1", "task_statistics"]
    );
}

#[tokio::test]
async fn test_every_task_tracker_rule_evicts_exact_key_set() {
    const ALL_KEYS: [&str; 10] = [
        "list_incomplete_tasks",
        "list_completed_tasks",
        "list_tasks:open",
        "task_statistics",
        "task_detail:1",
        "client_list",
        "client_detail:7",
        "client_tasks:7",
        "client_statistics:7",
        "calendar_events",
    ];

    let table: [(&str, &[&str]); 9] = [
        (
            operations::TASK_CREATE,
            &["list_incomplete_tasks", "list_tasks:open", "task_statistics"],
        ),
        (
            operations::TASK_UPDATE,
            &["list_incomplete_tasks", "list_tasks:open", "task_detail:1"],
        ),
        (
            operations::TASK_DELETE,
            &[
                "client_tasks:7",
                "list_completed_tasks",
                "list_incomplete_tasks",
                "list_tasks:open",
                "task_detail:1",
                "task_statistics",
            ],
        ),
        (
            operations::TASK_STATUS_CHANGE,
            &[
                "list_completed_tasks",
                "list_incomplete_tasks",
                "task_detail:1",
                "task_statistics",
            ],
        ),
        (
            operations::TASK_ASSIGN,
            &["client_statistics:7", "client_tasks:7", "task_detail:1"],
        ),
        (operations::CLIENT_CREATE, &["client_list"]),
        (operations::CLIENT_UPDATE, &["client_detail:7", "client_list"]),
        (
            operations::CLIENT_DELETE,
            &[
                "client_detail:7",
                "client_list",
                "client_statistics:7",
                "client_tasks:7",
                "list_tasks:open",
            ],
        ),
        (
            operations::BULK_OPERATION,
            &[
                "client_detail:7",
                "client_list",
                "client_statistics:7",
                "client_tasks:7",
                "list_completed_tasks",
                "list_incomplete_tasks",
                "list_tasks:open",
                "task_detail:1",
                "task_statistics",
            ],
        ),
    ];

    for (operation, expected) in table {
        let cache = Arc::new(cache_with(100, Duration::from_secs(60)));
        let manager =
            AutomatedCacheManager::new(cache.clone()).with_rules(task_tracker_rules().unwrap());
        for key in ALL_KEYS {
            cache.set(key, 0).await.unwrap();
        }

        let report = manager.on_operation(operation, None).await;

        let remaining = cache.keys().await;
        let mut removed: Vec<&str> = ALL_KEYS
            .iter()
            .copied()
            .filter(|key| !remaining.iter().any(|k| k == key))
            .collect();
        removed.sort_unstable();

        assert!(report.matched_rule, "{} has no rule", operation);
        assert_eq!(removed, expected, "wrong keys evicted by {}", operation);
        assert_eq!(report.keys_removed, expected.len(), "{}", operation);
        assert!(report.failures.is_empty(), "{}", operation);
    }
}

#[tokio::test]
async fn test_conditional_patterns_need_context() {
    let cache = Arc::new(cache_with(100, Duration::from_secs(60)));
    let manager = AutomatedCacheManager::new(cache.clone()).with_rules(task_tracker_rules().unwrap());

    cache.set("client_tasks:7", 0).await.unwrap();
    manager.on_operation(operations::TASK_CREATE, None).await;
    assert!(cache.contains_key("client_tasks:7").await);

    let mut ctx = HashMap::new();
    ctx.insert("client_id".to_string(), "7".to_string());
    manager.on_operation(operations::TASK_CREATE, Some(&ctx)).await;
    assert!(!cache.contains_key("client_tasks:7").await);
}

#[tokio::test]
async fn test_unknown_operation_is_noop() {
    let cache = Arc::new(cache_with(10, Duration::from_secs(60)));
    cache.set("task_statistics", 1).await.unwrap();
    let metrics = Arc::new(MetricsObserver::new());
    let manager = AutomatedCacheManager::with_observer(cache.clone(), metrics.clone())
        .with_rules(task_tracker_rules().unwrap());

    let report = manager.on_operation("calendar_sync", None).await;

    assert!(!report.matched_rule);
    assert_eq!(report.keys_removed, 0);
    assert!(cache.contains_key("task_statistics").await);
    assert_eq!(manager.stats().unknown_operations, 1);
    assert_eq!(metrics.snapshot().invalidations, 0);
}

#[tokio::test]
async fn test_typed_keys_and_scopes() {
    let cache = cache_with(100, Duration::from_secs(60));

    let open = CacheKey::builder("tasks")
        .operation("list")
        .param("status", "open")
        .build()
        .unwrap();
    let done = CacheKey::builder("tasks")
        .operation("list")
        .param("status", "done")
        .build()
        .unwrap();
    let stats = CacheKey::builder("tasks").operation("stats").build().unwrap();

    cache.set(open.as_str(), 1).await.unwrap();
    cache.set(done.as_str(), 2).await.unwrap();
    cache.set(stats.as_str(), 3).await.unwrap();
    cache.set("tasksx:other", 4).await.unwrap();

    let removed = cache
        .invalidate_matching(&CacheKey::operation_scope("tasks", "list").unwrap())
        .await;
    assert_eq!(removed, 2);
    assert!(cache.contains_key(stats.as_str()).await);

    let removed = cache
        .invalidate_matching(&CacheKey::namespace_scope("tasks").unwrap())
        .await;
    assert_eq!(removed, 1);
    assert!(cache.contains_key("tasksx:other").await);

    let removed = cache
        .invalidate_matching(&KeyPattern::parse("tasks*").unwrap())
        .await;
    assert_eq!(removed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_round_trip_across_tasks() {
    let cache = Arc::new(cache_with(1_000, Duration::from_secs(60)));

    let writers = (0..50).map(|i| {
        let cache = cache.clone();
        tokio::spawn(async move { cache.set(format!("key_{}", i), i).await })
    });
    for result in join_all(writers).await {
        result.unwrap().unwrap();
    }

    let readers = (0..50).map(|i| {
        let cache = cache.clone();
        tokio::spawn(async move { (i, cache.get(&format!("key_{}", i)).await) })
    });
    for result in join_all(readers).await {
        let (i, value) = result.unwrap();
        assert_eq!(value, Some(i));
    }

    let stats = cache.stats().await;
    assert_eq!(stats.hits, 50);
    assert_eq!(stats.entry_count, 50);
}

#[tokio::test]
async fn test_get_or_fetch_caches_value() {
    let cache = cache_with(10, Duration::from_secs(60));

    let first = cache
        .get_or_fetch("expensive", None, || Ok(41 + 1))
        .await
        .unwrap();
    let second = cache
        .get_or_fetch("expensive", None, || anyhow::bail!("should not be called"))
        .await
        .unwrap();
    assert_eq!(first, 42);
    assert_eq!(second, 42);

    let err = cache
        .get_or_fetch("broken", None, || anyhow::bail!("db down"))
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::Fetch(ref msg) if msg.contains("db down")));
    assert!(!cache.contains_key("broken").await);
}
