//! Tunables for the processor and the retry worker.

use std::time::Duration;

use crate::retry::RetryPolicy;

/// Processor configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Backoff and retry cap for transient failures.
    pub retry: RetryPolicy,

    /// How long an attempt waits for the per-order lock before giving up.
    pub lock_timeout: Duration,

    /// Reload-and-revalidate rounds allowed on a version conflict within one attempt.
    pub max_conflict_reloads: u32,

    /// Age after which a `processing` claim is considered abandoned.
    pub processing_lease: Duration,

    /// Upper bound on a single notification call.
    pub notify_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            lock_timeout: Duration::from_secs(2),
            max_conflict_reloads: 3,
            processing_lease: Duration::from_secs(60),
            notify_timeout: Duration::from_secs(1),
        }
    }
}

/// Retry worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Time between sweeps.
    pub interval: Duration,

    /// Maximum events fetched per sweep.
    pub batch_size: usize,

    /// Events re-run concurrently within a sweep.
    pub concurrency: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            batch_size: 100,
            concurrency: 16,
        }
    }
}
