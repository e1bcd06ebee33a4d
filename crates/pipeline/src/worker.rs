//! Background sweep that re-runs events due for another attempt.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use event_store::{EventLog, EventStoreError};
use futures_util::{StreamExt, stream};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::backend::Backend;
use crate::config::WorkerConfig;
use crate::outcome::Outcome;
use crate::processor::EventProcessor;

/// Tally of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub attempted: usize,
    pub applied: usize,
    pub rejected: usize,
    pub rescheduled: usize,
    pub exhausted: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Periodically picks up `retry_scheduled` events whose backoff has elapsed,
/// plus `received`/`processing` rows abandoned for longer than the lease,
/// and hands them back to the processor.
pub struct RetryWorker<B: Backend> {
    processor: Arc<EventProcessor<B>>,
    config: WorkerConfig,
}

impl<B: Backend> RetryWorker<B> {
    pub fn new(processor: Arc<EventProcessor<B>>, config: WorkerConfig) -> Self {
        Self { processor, config }
    }

    /// Runs one sweep as of `now`.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<SweepReport, EventStoreError> {
        let due = self
            .processor
            .events()
            .due_for_retry(
                now,
                self.processor.config().processing_lease,
                self.config.batch_size,
            )
            .await?;

        if due.is_empty() {
            return Ok(SweepReport::default());
        }
        tracing::debug!(count = due.len(), "retrying due events");

        let processor = &self.processor;
        let results: Vec<_> = stream::iter(due)
            .map(|record| async move {
                let result = processor.retry(&record.event_id).await;
                (record.event_id, result)
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut report = SweepReport {
            attempted: results.len(),
            ..SweepReport::default()
        };
        for (event_id, result) in results {
            match result {
                Ok(Outcome::Applied { .. }) => report.applied += 1,
                Ok(Outcome::Rejected { .. }) => report.rejected += 1,
                Ok(Outcome::RetryScheduled { .. }) => report.rescheduled += 1,
                Ok(Outcome::Exhausted { .. }) => report.exhausted += 1,
                Ok(Outcome::Duplicate { .. }) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(%event_id, error = %e, "retry attempt failed");
                }
            }
        }

        metrics::counter!("retry_worker_events_total").increment(report.attempted as u64);
        tracing::info!(?report, "retry sweep finished");
        Ok(report)
    }

    /// Sweeps every `interval` until `shutdown` flips to true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval = ?self.config.interval, "retry worker started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once(Utc::now()).await {
                        tracing::error!(error = %e, "retry sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("retry worker stopped");
    }
}
