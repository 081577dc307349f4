//! Integration tests for the background job queue
//!
//! These tests cover:
//! - Status, result and error polling
//! - Priority ordering with a single worker
//! - Backpressure and cancellation
//! - Shutdown with and without a drain deadline

use serde_json::json;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use taskcache::jobs::{BackgroundJobQueue, JobRequest, JobStatus, QueueConfig};
use taskcache::{CacheError, MetricsObserver};

const WAIT: Duration = Duration::from_secs(5);

fn queue_with(workers: usize, capacity: usize) -> BackgroundJobQueue {
    let config = QueueConfig::builder()
        .workers(workers)
        .capacity(capacity)
        .build();
    BackgroundJobQueue::start(config).unwrap()
}

/// A job that blocks its worker until the returned sender fires or is dropped
fn blocker() -> (JobRequest, mpsc::Sender<()>) {
    let (tx, rx) = mpsc::channel::<()>();
    let job = JobRequest::new(move || {
        let _ = rx.recv_timeout(WAIT);
        Ok(json!("unblocked"))
    });
    (job, tx)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_job_completes() {
    let queue = queue_with(2, 10);

    let id = queue
        .submit(
            JobRequest::new(|| {
                thread::sleep(Duration::from_millis(100));
                Ok(json!("x"))
            })
            .with_id("j1")
            .priority(5),
        )
        .await
        .unwrap();
    assert_eq!(id, "j1");

    let status = queue.get_status("j1").await.unwrap();
    assert!(matches!(status, JobStatus::Pending | JobStatus::Running));
    assert_eq!(queue.get_result("j1").await, None);

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(queue.get_status("j1").await.unwrap(), JobStatus::Completed);
    assert_eq!(queue.get_result("j1").await, Some(json!("x")));
    assert_eq!(queue.get_error("j1").await, None);
}

#[tokio::test]
async fn test_failing_job_reports_error() {
    let queue = queue_with(1, 10);

    queue
        .submit(
            JobRequest::new(|| Err(anyhow::anyhow!("database unavailable")))
                .with_id("j2")
                .priority(1),
        )
        .await
        .unwrap();

    assert_eq!(queue.wait_for("j2", WAIT).await.unwrap(), JobStatus::Failed);
    let error = queue.get_error("j2").await.unwrap();
    assert!(
        matches!(error, CacheError::JobExecution(ref msg) if msg.contains("database unavailable")),
        "{}",
        error
    );
    assert_eq!(queue.get_result("j2").await, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_priority_order_with_one_worker() {
    let queue = queue_with(1, 10);
    let order = Arc::new(Mutex::new(Vec::new()));

    // Occupy the only worker so the rest queue up together
    let (job, release) = blocker();
    let blocker_id = queue.submit(job.priority(0)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(queue.get_status(&blocker_id).await.unwrap(), JobStatus::Running);

    let mut ids = Vec::new();
    for priority in [3, 1, 2] {
        let order = order.clone();
        let id = queue
            .submit(
                JobRequest::new(move || {
                    order.lock().unwrap().push(priority);
                    Ok(json!(priority))
                })
                .priority(priority),
            )
            .await
            .unwrap();
        ids.push(id);
    }

    release.send(()).unwrap();
    for id in &ids {
        assert_eq!(queue.wait_for(id, WAIT).await.unwrap(), JobStatus::Completed);
    }

    assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_equal_priority_runs_in_submission_order() {
    let queue = queue_with(1, 10);
    let order = Arc::new(Mutex::new(Vec::new()));

    let (job, release) = blocker();
    queue.submit(job).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut ids = Vec::new();
    for n in 0..5 {
        let order = order.clone();
        let id = queue
            .submit(JobRequest::new(move || {
                order.lock().unwrap().push(n);
                Ok(json!(n))
            }))
            .await
            .unwrap();
        ids.push(id);
    }

    release.send(()).unwrap();
    for id in &ids {
        queue.wait_for(id, WAIT).await.unwrap();
    }
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_lost_jobs() {
    let queue = queue_with(4, 200);

    let mut ids = Vec::new();
    for i in 0..100 {
        let request = if i % 7 == 0 {
            JobRequest::new(move || anyhow::bail!("job {} failed", i))
        } else {
            JobRequest::new(move || Ok(json!(i)))
        };
        ids.push(queue.submit(request.priority(i % 3)).await.unwrap());
    }

    for id in &ids {
        let status = queue.wait_for(id, WAIT).await.unwrap();
        assert!(status.is_terminal(), "job {} stuck in {}", id, status);
    }

    let stats = queue.stats().await;
    assert_eq!(stats.submitted, 100);
    assert_eq!(stats.completed + stats.failed, 100);
    assert_eq!(stats.failed, 15);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.running, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_full_queue_rejects_immediately() {
    let metrics = Arc::new(MetricsObserver::new());
    let config = QueueConfig::builder().workers(1).capacity(2).build();
    let queue = BackgroundJobQueue::start_with(config, metrics.clone(), None).unwrap();

    let (job, release) = blocker();
    queue.submit(job).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    queue.submit(JobRequest::new(|| Ok(json!(1)))).await.unwrap();
    queue.submit(JobRequest::new(|| Ok(json!(2)))).await.unwrap();

    let err = queue
        .submit(JobRequest::new(|| Ok(json!(3))).with_id("overflow"))
        .await
        .unwrap_err();
    assert_eq!(err, CacheError::QueueFull { capacity: 2 });
    assert!(queue.get_job("overflow").await.is_none());
    assert_eq!(queue.stats().await.rejected, 1);
    assert_eq!(metrics.snapshot().jobs_rejected, 1);

    release.send(()).unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_enqueue_timeout_expires() {
    let config = QueueConfig::builder()
        .workers(1)
        .capacity(1)
        .enqueue_timeout(Duration::from_millis(100))
        .build();
    let queue = BackgroundJobQueue::start(config).unwrap();

    let (job, release) = blocker();
    queue.submit(job).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    queue.submit(JobRequest::new(|| Ok(json!(1)))).await.unwrap();

    let started = tokio::time::Instant::now();
    let err = queue
        .submit(JobRequest::new(|| Ok(json!(2))))
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::QueueFull { .. }));
    assert!(started.elapsed() >= Duration::from_millis(90));

    release.send(()).unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_pending_but_not_running() {
    let queue = queue_with(1, 10);

    let (job, release) = blocker();
    let running = queue.submit(job).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let pending = queue
        .submit(JobRequest::new(|| Ok(json!("never"))).with_id("later"))
        .await
        .unwrap();

    assert!(!queue.cancel(&running).await);
    assert!(queue.cancel(&pending).await);
    assert!(!queue.cancel(&pending).await);
    assert_eq!(queue.get_status(&pending).await.unwrap(), JobStatus::Cancelled);

    release.send(()).unwrap();
    assert_eq!(
        queue.wait_for(&running, WAIT).await.unwrap(),
        JobStatus::Completed
    );
    assert_eq!(queue.get_result(&pending).await, None);
    assert_eq!(queue.stats().await.cancelled, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_drains_queued_jobs() {
    let queue = queue_with(2, 50);

    let mut ids = Vec::new();
    for i in 0..10 {
        let id = queue
            .submit(JobRequest::new(move || {
                thread::sleep(Duration::from_millis(10));
                Ok(json!(i))
            }))
            .await
            .unwrap();
        ids.push(id);
    }

    let report = queue.shutdown(WAIT).await;
    assert!(report.drained);
    assert_eq!(report.abandoned_jobs, 0);

    for id in &ids {
        assert_eq!(queue.get_status(id).await.unwrap(), JobStatus::Completed);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_deadline_fails_leftovers() {
    let queue = queue_with(1, 10);

    let (job, _release) = blocker();
    let stuck = queue.submit(job).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let queued = queue.submit(JobRequest::new(|| Ok(json!(1)))).await.unwrap();

    let report = queue.shutdown(Duration::from_millis(100)).await;

    assert!(!report.drained);
    assert_eq!(report.forced_workers, 1);
    assert_eq!(report.abandoned_jobs, 2);
    for id in [&stuck, &queued] {
        assert_eq!(queue.get_status(id).await.unwrap(), JobStatus::Failed);
        assert_eq!(queue.get_error(id).await, Some(CacheError::ShuttingDown));
    }

    assert_eq!(
        queue.submit(JobRequest::new(|| Ok(json!(2)))).await.unwrap_err(),
        CacheError::ShuttingDown
    );
}

#[tokio::test]
async fn test_wait_for_times_out_on_running_job() {
    let queue = queue_with(1, 10);
    let (job, release) = blocker();
    let id = queue.submit(job).await.unwrap();

    let status = queue.wait_for(&id, Duration::from_millis(50)).await.unwrap();
    assert!(!status.is_terminal());

    release.send(()).unwrap();
    assert_eq!(queue.wait_for(&id, WAIT).await.unwrap(), JobStatus::Completed);
}
