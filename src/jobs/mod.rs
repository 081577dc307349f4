//! # Background Jobs
//!
//! Priority queue for expensive work that should not run on the request path.
//!
//! ## Features
//!
//! - **Priority Scheduling**: lower values first, FIFO among equals
//! - **Bounded Pending Queue**: fail fast or wait for a slot when full
//! - **Polling API**: status, result and error by job id
//! - **Cancellation**: drop jobs that have not started
//! - **Result Retention**: finished jobs expire after a TTL and a count bound
//! - **Graceful Shutdown**: drain with a deadline, then fail what is left

pub mod config;
pub mod job;
pub mod queue;

pub use config::{QueueConfig, QueueConfigBuilder};
pub use job::{BackgroundJob, JobRequest, JobStatus, JobValue, DEFAULT_PRIORITY};
pub use queue::{BackgroundJobQueue, QueueStats, ShutdownReport};
