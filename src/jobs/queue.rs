//! Priority job queue with a fixed worker pool
//!
//! Jobs wait in a binary heap ordered by `(priority, submission order)` and
//! are pulled by `workers` tokio tasks. Each job body runs on the blocking
//! pool so a slow or CPU-bound job never stalls the runtime. Finished jobs
//! stay queryable until their result TTL passes or the retention bound
//! pushes them out.

use crate::cache::store::QueryCache;
use crate::error::{CacheError, Result};
use crate::jobs::config::QueueConfig;
use crate::jobs::job::{generate_job_id, BackgroundJob, JobFn, JobRequest, JobStatus, JobValue};
use crate::observer::{CacheEvent, CacheObserver, TracingObserver};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Counters and gauges for the queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub rejected: u64,
    /// Finished job records dropped by retention
    pub purged: u64,
    pub pending: usize,
    pub running: usize,
    /// Finished jobs still queryable
    pub retained: usize,
}

/// Outcome of [`BackgroundJobQueue::shutdown`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownReport {
    /// Every accepted job reached a terminal state by running
    pub drained: bool,
    /// Workers still busy at the deadline and aborted
    pub forced_workers: usize,
    /// Jobs marked failed because they never got to finish
    pub abandoned_jobs: usize,
}

/// Entry in the pending heap
struct QueuedJob {
    priority: i32,
    sequence: u64,
    id: String,
    cache_key: Option<String>,
    work: JobFn,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    // BinaryHeap is a max-heap: the lowest priority value, then the earliest
    // submission, must compare greatest.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

#[derive(Default)]
struct Counters {
    submitted: u64,
    completed: u64,
    failed: u64,
    cancelled: u64,
    purged: u64,
}

#[derive(Default)]
struct QueueState {
    pending: BinaryHeap<QueuedJob>,
    jobs: HashMap<String, BackgroundJob>,
    /// Finished jobs in completion order, for retention
    finished: VecDeque<(DateTime<Utc>, String)>,
    /// Number of terminal records in `jobs`
    retained: usize,
    counters: Counters,
}

impl QueueState {
    fn record_finished(&mut self, id: &str) {
        if let Some(completed_at) = self.jobs.get(id).and_then(|job| job.completed_at) {
            self.finished.push_back((completed_at, id.to_string()));
            self.retained += 1;
        }
    }

    /// Drop finished records past their TTL or beyond the retention bound
    fn purge(&mut self, now: DateTime<Utc>, config: &QueueConfig) -> usize {
        let ttl = chrono::Duration::from_std(config.result_ttl)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        let mut removed = 0;

        while let Some((completed_at, _)) = self.finished.front() {
            let expired = now - *completed_at >= ttl;
            if !expired && self.retained <= config.max_retained_results {
                break;
            }

            let Some((completed_at, id)) = self.finished.pop_front() else {
                break;
            };

            // The id may have been reused by a later submission
            let current = self.jobs.get(&id).map_or(false, |job| {
                job.status.is_terminal() && job.completed_at == Some(completed_at)
            });
            if current {
                self.jobs.remove(&id);
                self.retained -= 1;
                removed += 1;
            }
        }

        self.counters.purged += removed as u64;
        removed
    }
}

struct QueueInner {
    config: QueueConfig,
    state: Mutex<QueueState>,
    work_available: Notify,
    space_available: Notify,
    job_finished: Notify,
    accepting: AtomicBool,
    stopping: AtomicBool,
    sequence: AtomicU64,
    rejected: AtomicU64,
    observer: Arc<dyn CacheObserver>,
    result_cache: Option<Arc<QueryCache<JobValue>>>,
}

impl QueueInner {
    /// Pop the most urgent pending job and mark it running
    async fn next_job(&self) -> Option<QueuedJob> {
        let mut state = self.state.lock().await;
        let state = &mut *state;

        while let Some(job) = state.pending.pop() {
            if let Some(record) = state.jobs.get_mut(&job.id) {
                if record.start() {
                    debug!("Job {} waited {:?} in queue", job.id, record.queue_time());
                    return Some(job);
                }
            }
            // Cancelled or replaced while queued
        }
        None
    }

    async fn execute(&self, job: QueuedJob, worker_id: usize) {
        let QueuedJob {
            id,
            cache_key,
            work,
            ..
        } = job;
        debug!("Worker {} running job {}", worker_id, id);

        // Read before the body runs; any invalidation after this point makes
        // the result too old to cache.
        let generation = match (&cache_key, &self.result_cache) {
            (Some(_), Some(cache)) => Some(cache.generation().await),
            _ => None,
        };

        let started = Instant::now();
        let outcome = match tokio::task::spawn_blocking(work).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(CacheError::JobExecution(format!("{:#}", err))),
            Err(err) => Err(CacheError::JobExecution(join_error_message(err))),
        };
        let elapsed = started.elapsed();

        // Cached before the job turns Completed, so a poller that sees the
        // result can also read it from the cache.
        if let (Ok(value), Some(key), Some(cache), Some(generation)) =
            (&outcome, &cache_key, &self.result_cache, generation)
        {
            match cache.set_if_unchanged(key.clone(), value.clone(), generation).await {
                Ok(true) => {}
                Ok(false) => debug!(
                    "Not caching result of job {} under '{}': cache invalidated while it ran",
                    id, key
                ),
                Err(e) => warn!("Failed to cache result of job {} under '{}': {}", id, key, e),
            }
        }

        let event = {
            let mut state = self.state.lock().await;
            let state = &mut *state;
            let Some(record) = state.jobs.get_mut(&id) else {
                return;
            };

            // None when shutdown already failed the job
            let event = match outcome {
                Ok(value) => record.complete(value).then(|| CacheEvent::JobCompleted {
                    job_id: id.clone(),
                    elapsed,
                }),
                Err(error) => record.fail(error.clone()).then(|| CacheEvent::JobFailed {
                    job_id: id.clone(),
                    error: error.to_string(),
                }),
            };

            match &event {
                Some(CacheEvent::JobCompleted { .. }) => state.counters.completed += 1,
                Some(_) => state.counters.failed += 1,
                None => return,
            }
            state.record_finished(&id);
            state.purge(Utc::now(), &self.config);
            event
        };

        self.job_finished.notify_waiters();
        if let Some(event) = event {
            self.observer.on_event(&event);
        }
    }

    fn reject(&self, job_id: &str, error: CacheError) -> CacheError {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        debug!("Rejected job {}: {}", job_id, error);
        self.observer.on_event(&CacheEvent::JobRejected {
            job_id: job_id.to_string(),
            reason: error.to_string(),
        });
        error
    }
}

fn join_error_message(err: JoinError) -> String {
    if !err.is_panic() {
        return format!("job aborted: {}", err);
    }

    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("job panicked: {}", message)
}

async fn worker_loop(inner: Arc<QueueInner>, worker_id: usize) {
    debug!("Worker {} started", worker_id);

    loop {
        // Registered before checking the heap so a submit in between is not missed
        let notified = inner.work_available.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if let Some(job) = inner.next_job().await {
            inner.space_available.notify_one();
            inner.execute(job, worker_id).await;
            continue;
        }

        if inner.stopping.load(Ordering::Acquire) {
            break;
        }

        notified.await;
    }

    debug!("Worker {} stopped", worker_id);
}

fn spawn_sweeper(inner: &Arc<QueueInner>) -> JoinHandle<()> {
    let interval = inner.config.sweep_interval;
    let weak: Weak<QueueInner> = Arc::downgrade(inner);

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;

            let Some(inner) = weak.upgrade() else {
                break;
            };

            let removed = inner.state.lock().await.purge(Utc::now(), &inner.config);
            if removed > 0 {
                debug!("Purged {} finished job records", removed);
            }
        }
    })
}

/// Bounded priority queue executing jobs on a pool of workers
///
/// Must be started inside a tokio runtime. Lower priority values run first;
/// jobs with equal priority run in submission order.
///
/// ```rust
/// use taskcache::jobs::{BackgroundJobQueue, JobRequest, JobStatus, QueueConfig};
/// use std::time::Duration;
///
/// # async fn example() -> taskcache::Result<()> {
/// let queue = BackgroundJobQueue::start(QueueConfig::default())?;
/// let id = queue
///     .submit(JobRequest::new(|| Ok(serde_json::json!("done"))).priority(1))
///     .await?;
///
/// let status = queue.wait_for(&id, Duration::from_secs(5)).await?;
/// assert_eq!(status, JobStatus::Completed);
/// queue.shutdown(Duration::from_secs(5)).await;
/// # Ok(())
/// # }
/// ```
pub struct BackgroundJobQueue {
    inner: Arc<QueueInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundJobQueue {
    /// Start a queue that reports to `tracing`
    pub fn start(config: QueueConfig) -> Result<Self> {
        Self::start_with(config, Arc::new(TracingObserver), None)
    }

    /// Start a queue with an observer and an optional result cache
    ///
    /// Jobs submitted with [`JobRequest::cache_as`] write their result into
    /// `result_cache` when they complete.
    pub fn start_with(
        config: QueueConfig,
        observer: Arc<dyn CacheObserver>,
        result_cache: Option<Arc<QueryCache<JobValue>>>,
    ) -> Result<Self> {
        config.validate()?;

        let workers = config.workers;
        let inner = Arc::new(QueueInner {
            config,
            state: Mutex::new(QueueState::default()),
            work_available: Notify::new(),
            space_available: Notify::new(),
            job_finished: Notify::new(),
            accepting: AtomicBool::new(true),
            stopping: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            observer,
            result_cache,
        });

        let handles: Vec<JoinHandle<()>> = (0..workers)
            .map(|worker_id| tokio::spawn(worker_loop(inner.clone(), worker_id)))
            .collect();
        let sweeper = spawn_sweeper(&inner);

        info!("Job queue started with {} workers", workers);

        Ok(Self {
            inner,
            workers: Mutex::new(handles),
            sweeper: Mutex::new(Some(sweeper)),
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::Acquire)
    }

    /// Enqueue a job and return its id
    ///
    /// A caller-chosen id may be reused once the previous job with that id
    /// has finished; reusing the id of an unfinished job is an error. When
    /// the queue is full this waits up to `enqueue_timeout` for a slot.
    pub async fn submit(&self, request: JobRequest) -> Result<String> {
        let JobRequest {
            id,
            priority,
            cache_key,
            work,
        } = request;
        let id = id.unwrap_or_else(generate_job_id);
        if id.is_empty() {
            return Err(CacheError::invalid("job id must not be empty"));
        }

        let inner = &self.inner;
        let capacity = inner.config.capacity;
        let deadline = Instant::now() + inner.config.enqueue_timeout;

        let mut state = loop {
            if !self.is_accepting() {
                return Err(inner.reject(&id, CacheError::ShuttingDown));
            }

            let space = inner.space_available.notified();
            tokio::pin!(space);
            space.as_mut().enable();

            let mut state = inner.state.lock().await;
            state.purge(Utc::now(), &inner.config);

            if let Some(existing) = state.jobs.get(&id) {
                if !existing.status.is_terminal() {
                    drop(state);
                    return Err(inner.reject(&id, CacheError::AlreadyExists { job_id: id.clone() }));
                }
            }

            if state.pending.len() < capacity {
                break state;
            }
            drop(state);

            if tokio::time::timeout_at(deadline, space).await.is_err() {
                return Err(inner.reject(&id, CacheError::QueueFull { capacity }));
            }
        };

        // Replacing a finished record with the same id
        if state.jobs.get(&id).map_or(false, |job| job.is_done()) {
            state.retained -= 1;
        }

        let sequence = inner.sequence.fetch_add(1, Ordering::Relaxed);
        state
            .jobs
            .insert(id.clone(), BackgroundJob::new(id.clone(), priority, cache_key.clone()));
        state.pending.push(QueuedJob {
            priority,
            sequence,
            id: id.clone(),
            cache_key,
            work,
        });
        state.counters.submitted += 1;
        drop(state);

        inner.work_available.notify_one();
        debug!("Submitted job {} with priority {}", id, priority);
        Ok(id)
    }

    /// Current status of a job
    pub async fn get_status(&self, job_id: &str) -> Result<JobStatus> {
        self.get_job(job_id)
            .await
            .map(|job| job.status)
            .ok_or_else(|| CacheError::NotFound {
                job_id: job_id.to_string(),
            })
    }

    /// Result of a completed job
    pub async fn get_result(&self, job_id: &str) -> Option<JobValue> {
        self.get_job(job_id)
            .await
            .filter(|job| job.status == JobStatus::Completed)
            .and_then(|job| job.result)
    }

    /// Error of a failed job
    ///
    /// `JobExecution` for errors and panics raised by the job body,
    /// `ShuttingDown` for jobs the queue gave up on at shutdown.
    pub async fn get_error(&self, job_id: &str) -> Option<CacheError> {
        self.get_job(job_id)
            .await
            .filter(|job| job.status == JobStatus::Failed)
            .and_then(|job| job.error)
    }

    /// Snapshot of a job record
    pub async fn get_job(&self, job_id: &str) -> Option<BackgroundJob> {
        let mut state = self.inner.state.lock().await;
        state.purge(Utc::now(), &self.inner.config);
        state.jobs.get(job_id).cloned()
    }

    /// Cancel a job that has not started yet
    ///
    /// Returns `false` for running, finished and unknown jobs.
    pub async fn cancel(&self, job_id: &str) -> bool {
        {
            let mut state = self.inner.state.lock().await;
            let state = &mut *state;
            let cancelled = state
                .jobs
                .get_mut(job_id)
                .map_or(false, |job| job.cancel());
            if !cancelled {
                return false;
            }

            state.pending.retain(|queued| queued.id != job_id);
            state.counters.cancelled += 1;
            state.record_finished(job_id);
        }

        self.inner.space_available.notify_one();
        self.inner.job_finished.notify_waiters();
        debug!("Cancelled job {}", job_id);
        true
    }

    /// Wait until a job finishes or `timeout` passes
    ///
    /// Returns the status at that point, which is non-terminal if the
    /// timeout won.
    pub async fn wait_for(&self, job_id: &str, timeout: Duration) -> Result<JobStatus> {
        let deadline = Instant::now() + timeout;

        loop {
            let finished = self.inner.job_finished.notified();
            tokio::pin!(finished);
            finished.as_mut().enable();

            let status = self.get_status(job_id).await?;
            if status.is_terminal() {
                return Ok(status);
            }

            if tokio::time::timeout_at(deadline, finished).await.is_err() {
                return self.get_status(job_id).await;
            }
        }
    }

    pub async fn stats(&self) -> QueueStats {
        let state = self.inner.state.lock().await;
        let counters = &state.counters;

        QueueStats {
            submitted: counters.submitted,
            completed: counters.completed,
            failed: counters.failed,
            cancelled: counters.cancelled,
            rejected: self.inner.rejected.load(Ordering::Relaxed),
            purged: counters.purged,
            pending: state.pending.len(),
            running: state.jobs.values().filter(|job| job.is_running()).count(),
            retained: state.retained,
        }
    }

    /// Stop accepting work and drain the queue
    ///
    /// Workers keep running queued jobs until the queue is empty or `timeout`
    /// passes. Workers still busy at the deadline are aborted; jobs that did
    /// not finish are marked failed with [`CacheError::ShuttingDown`] so
    /// pollers see a terminal state.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        info!("Shutting down job queue (timeout: {:?})", timeout);

        let inner = &self.inner;
        inner.accepting.store(false, Ordering::Release);
        inner.stopping.store(true, Ordering::Release);
        inner.work_available.notify_waiters();
        inner.space_available.notify_waiters();

        if let Some(sweeper) = self.sweeper.lock().await.take() {
            sweeper.abort();
        }

        let workers = std::mem::take(&mut *self.workers.lock().await);
        let deadline = Instant::now() + timeout;
        let mut forced_workers = 0;

        for mut handle in workers {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                handle.abort();
                forced_workers += 1;
            }
        }

        let abandoned: Vec<String> = {
            let mut state = inner.state.lock().await;
            let state = &mut *state;
            state.pending.clear();

            let mut abandoned = Vec::new();
            for job in state.jobs.values_mut() {
                if job.fail(CacheError::ShuttingDown) {
                    abandoned.push(job.id.clone());
                }
            }
            for id in &abandoned {
                state.counters.failed += 1;
                state.record_finished(id);
            }
            abandoned
        };

        inner.job_finished.notify_waiters();
        for id in &abandoned {
            warn!("Job {} abandoned at shutdown", id);
            inner.observer.on_event(&CacheEvent::JobFailed {
                job_id: id.clone(),
                error: CacheError::ShuttingDown.to_string(),
            });
        }

        let report = ShutdownReport {
            drained: forced_workers == 0 && abandoned.is_empty(),
            forced_workers,
            abandoned_jobs: abandoned.len(),
        };

        if report.drained {
            info!("Job queue drained and stopped");
        } else {
            error!(
                "Job queue stopped with {} aborted workers and {} abandoned jobs",
                report.forced_workers, report.abandoned_jobs
            );
        }
        report
    }
}

impl Drop for BackgroundJobQueue {
    fn drop(&mut self) {
        // Workers finish what is queued, then exit
        self.inner.accepting.store(false, Ordering::Release);
        self.inner.stopping.store(true, Ordering::Release);
        self.inner.work_available.notify_waiters();
    }
}
