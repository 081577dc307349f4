//! Error types for cache and job queue operations
//!
//! Argument and capacity errors are returned synchronously from the call that
//! caused them. Failures inside background jobs are stored on the job and read
//! back through polling; invalidation failures are reported to the observer
//! and never returned to the write path.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the caching subsystem
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheError {
    /// Bad TTL, bad capacity, malformed pattern
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A job with this id exists and has not finished yet
    #[error("Job already exists and is not finished: {job_id}")]
    AlreadyExists { job_id: String },

    /// The pending queue is at capacity
    #[error("Job queue is full: all {capacity} slots are in use")]
    QueueFull { capacity: usize },

    /// Unknown (or already purged) job id
    #[error("Job not found: {job_id}")]
    NotFound { job_id: String },

    /// Error raised by a caller-supplied job body
    #[error("Job execution failed: {0}")]
    JobExecution(String),

    /// Cache invalidation did not complete for a pattern
    #[error("Invalidation of '{pattern}' failed: {reason}")]
    InvalidationFailure { pattern: String, reason: String },

    /// The queue no longer accepts work
    #[error("Job queue is shutting down")]
    ShuttingDown,

    /// A fetch function failed on a cache miss
    #[error("Fetch failed: {0}")]
    Fetch(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

impl CacheError {
    /// Shorthand for [`CacheError::InvalidArgument`]
    pub fn invalid(msg: impl Into<String>) -> Self {
        CacheError::InvalidArgument(msg.into())
    }

    /// Build a [`CacheError::Fetch`] keeping the full error chain
    pub fn fetch(err: anyhow::Error) -> Self {
        CacheError::Fetch(format!("{:#}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = CacheError::invalid("ttl must be positive");
        assert_eq!(error.to_string(), "Invalid argument: ttl must be positive");

        let full = CacheError::QueueFull { capacity: 16 };
        assert!(full.to_string().contains("16 slots"));

        let dup = CacheError::AlreadyExists {
            job_id: "j1".to_string(),
        };
        assert!(dup.to_string().contains("j1"));
    }

    #[test]
    fn test_fetch_keeps_context_chain() {
        let err = anyhow::anyhow!("connection refused").context("loading task list");
        let error = CacheError::fetch(err);
        let text = error.to_string();
        assert!(text.contains("loading task list"));
        assert!(text.contains("connection refused"));
    }
}
