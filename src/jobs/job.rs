use crate::error::CacheError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Value produced by a background job
pub type JobValue = serde_json::Value;

/// Work executed on a worker thread
pub(crate) type JobFn = Box<dyn FnOnce() -> anyhow::Result<JobValue> + Send + 'static>;

/// Priority used when a request does not set one
pub const DEFAULT_PRIORITY: i32 = 5;

/// Lifecycle of a background job
///
/// Transitions only move forward:
/// `Pending -> Running -> {Completed, Failed}`, or `Pending -> Cancelled`.
/// A pending job can also go straight to `Failed` if the queue shuts down
/// before it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// State of one submitted job, as seen by pollers
///
/// `result` and `error` are mutually exclusive: only a `Completed` job has a
/// result and only a `Failed` job has an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundJob {
    pub id: String,
    /// Lower value runs first
    pub priority: i32,
    pub status: JobStatus,
    pub result: Option<JobValue>,
    pub error: Option<CacheError>,
    /// Query cache key the result is written to on completion
    pub cache_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BackgroundJob {
    pub(crate) fn new(id: String, priority: i32, cache_key: Option<String>) -> Self {
        Self {
            id,
            priority,
            status: JobStatus::Pending,
            result: None,
            error: None,
            cache_key,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == JobStatus::Pending
    }

    pub fn is_running(&self) -> bool {
        self.status == JobStatus::Running
    }

    pub fn is_done(&self) -> bool {
        self.status.is_terminal()
    }

    pub(crate) fn start(&mut self) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
        true
    }

    pub(crate) fn complete(&mut self, value: JobValue) -> bool {
        if !self.is_running() {
            return false;
        }
        self.status = JobStatus::Completed;
        self.result = Some(value);
        self.completed_at = Some(Utc::now());
        true
    }

    pub(crate) fn fail(&mut self, error: CacheError) -> bool {
        if self.is_done() {
            return false;
        }
        self.status = JobStatus::Failed;
        self.error = Some(error);
        self.completed_at = Some(Utc::now());
        true
    }

    pub(crate) fn cancel(&mut self) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(Utc::now());
        true
    }

    /// Time spent waiting in the queue
    pub fn queue_time(&self) -> Option<Duration> {
        let started = self.started_at?;
        (started - self.created_at).to_std().ok()
    }

    /// Time spent executing
    pub fn run_time(&self) -> Option<Duration> {
        let started = self.started_at?;
        let completed = self.completed_at?;
        (completed - started).to_std().ok()
    }
}

/// A job to submit: the work plus its scheduling options
///
/// Arguments are captured by the closure:
///
/// ```rust
/// use taskcache::jobs::JobRequest;
///
/// let client_id = 42;
/// let request = JobRequest::new(move || Ok(serde_json::json!({ "client": client_id })))
///     .with_id("report-42")
///     .priority(1);
/// ```
pub struct JobRequest {
    pub(crate) id: Option<String>,
    pub(crate) priority: i32,
    pub(crate) cache_key: Option<String>,
    pub(crate) work: JobFn,
}

impl JobRequest {
    pub fn new<F>(work: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<JobValue> + Send + 'static,
    {
        Self {
            id: None,
            priority: DEFAULT_PRIORITY,
            cache_key: None,
            work: Box::new(work),
        }
    }

    /// Like [`JobRequest::new`] for work returning any serializable type
    pub fn serialized<F, T>(work: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Serialize,
    {
        Self::new(move || Ok(serde_json::to_value(work()?)?))
    }

    /// Use a caller-chosen id instead of a generated one
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Lower values run first
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Also store the result in the queue's result cache under `key`
    ///
    /// This is cache-aside: the write happens after the body returns. If any
    /// invalidation hits the cache while the job runs, the result is still
    /// stored on the job but not written to the cache, so a report computed
    /// before a write is never cached after it.
    pub fn cache_as(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }
}

impl fmt::Debug for JobRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRequest")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("cache_key", &self.cache_key)
            .finish_non_exhaustive()
    }
}

pub(crate) fn generate_job_id() -> String {
    format!("job-{}", Uuid::new_v4().simple())
}
