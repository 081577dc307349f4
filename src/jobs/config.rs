//! Configuration for the background job queue

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the background job queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Number of worker tasks executing jobs concurrently
    pub workers: usize,

    /// Maximum number of pending (not yet started) jobs
    pub capacity: usize,

    /// How long `submit` waits for a free slot when the queue is full
    /// Zero rejects immediately with `QueueFull`
    pub enqueue_timeout: Duration,

    /// How long a finished job stays queryable
    pub result_ttl: Duration,

    /// Upper bound on finished jobs kept for polling
    /// The oldest finished jobs are dropped first
    pub max_retained_results: usize,

    /// Interval of the background purge of expired job records
    pub sweep_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            capacity: 1000,
            enqueue_timeout: Duration::ZERO,
            result_ttl: Duration::from_secs(3600),
            max_retained_results: 10_000,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl QueueConfig {
    pub fn builder() -> QueueConfigBuilder {
        QueueConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(CacheError::invalid("workers must be greater than 0"));
        }

        if self.capacity == 0 {
            return Err(CacheError::invalid("capacity must be greater than 0"));
        }

        if self.result_ttl.is_zero() {
            return Err(CacheError::invalid("result_ttl must be positive"));
        }

        if self.max_retained_results == 0 {
            return Err(CacheError::invalid(
                "max_retained_results must be greater than 0",
            ));
        }

        if self.sweep_interval.is_zero() {
            return Err(CacheError::invalid("sweep_interval must be positive"));
        }

        Ok(())
    }
}

/// Builder for queue configuration
#[derive(Debug, Default)]
pub struct QueueConfigBuilder {
    workers: Option<usize>,
    capacity: Option<usize>,
    enqueue_timeout: Option<Duration>,
    result_ttl: Option<Duration>,
    max_retained_results: Option<usize>,
    sweep_interval: Option<Duration>,
}

impl QueueConfigBuilder {
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn enqueue_timeout(mut self, timeout: Duration) -> Self {
        self.enqueue_timeout = Some(timeout);
        self
    }

    pub fn result_ttl(mut self, ttl: Duration) -> Self {
        self.result_ttl = Some(ttl);
        self
    }

    pub fn max_retained_results(mut self, max: usize) -> Self {
        self.max_retained_results = Some(max);
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    pub fn build(self) -> QueueConfig {
        let defaults = QueueConfig::default();

        QueueConfig {
            workers: self.workers.unwrap_or(defaults.workers),
            capacity: self.capacity.unwrap_or(defaults.capacity),
            enqueue_timeout: self.enqueue_timeout.unwrap_or(defaults.enqueue_timeout),
            result_ttl: self.result_ttl.unwrap_or(defaults.result_ttl),
            max_retained_results: self
                .max_retained_results
                .unwrap_or(defaults.max_retained_results),
            sweep_interval: self.sweep_interval.unwrap_or(defaults.sweep_interval),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();
        assert_eq!(config.workers, 4);
        assert_eq!(config.capacity, 1000);
        assert!(config.enqueue_timeout.is_zero());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let invalid = QueueConfig::builder().workers(0).build();
        assert!(matches!(invalid.validate(), Err(CacheError::InvalidArgument(_))));

        let invalid = QueueConfig::builder().capacity(0).build();
        assert!(invalid.validate().is_err());

        let invalid = QueueConfig::builder().result_ttl(Duration::ZERO).build();
        assert!(invalid.validate().is_err());

        let invalid = QueueConfig::builder().max_retained_results(0).build();
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_builder() {
        let config = QueueConfig::builder()
            .workers(2)
            .capacity(8)
            .enqueue_timeout(Duration::from_millis(50))
            .build();

        assert_eq!(config.workers, 2);
        assert_eq!(config.capacity, 8);
        assert_eq!(config.enqueue_timeout, Duration::from_millis(50));
        assert_eq!(config.result_ttl, Duration::from_secs(3600));
    }
}
