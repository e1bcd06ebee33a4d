use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{ClaimOutcome, EventId, EventRecord, InboundEvent, OrderId, RecordOutcome, Result};

/// Durable log of every provider event ever seen.
///
/// The log is the deduplication gate of the pipeline: `record` is an atomic
/// insert keyed by `event_id`, and its unique constraint is the only
/// synchronization needed between concurrent deliveries. Status changes are
/// only made by the processing pipeline, and rows are never deleted.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Records an inbound event.
    ///
    /// Returns `FirstSeen` if the row was inserted, or `Duplicate` with the
    /// stored row if the event id already exists.
    async fn record(&self, event: InboundEvent) -> Result<RecordOutcome>;

    /// Atomically claims an event for an attempt.
    ///
    /// Succeeds for `Received` and `RetryScheduled` rows and for `Processing`
    /// rows whose claim is older than `lease`.
    async fn claim(&self, event_id: &EventId, lease: Duration) -> Result<ClaimOutcome>;

    /// Marks a claimed event as applied.
    async fn mark_applied(&self, event_id: &EventId) -> Result<()>;

    /// Marks a claimed event as rejected by a business rule.
    async fn mark_rejected(&self, event_id: &EventId, reason: &str) -> Result<()>;

    /// Schedules another attempt for a claimed event.
    async fn schedule_retry(
        &self,
        event_id: &EventId,
        retry_count: u32,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Marks a claimed event as exhausted (dead-lettered).
    async fn mark_exhausted(&self, event_id: &EventId, retry_count: u32, error: &str)
    -> Result<()>;

    /// Moves an exhausted event back to `RetryScheduled` with a fresh retry budget.
    async fn requeue(&self, event_id: &EventId, at: DateTime<Utc>) -> Result<EventRecord>;

    /// Retrieves a single event.
    async fn get(&self, event_id: &EventId) -> Result<Option<EventRecord>>;

    /// Retrieves events the retry worker should run at `now`, oldest first.
    async fn due_for_retry(
        &self,
        now: DateTime<Utc>,
        lease: Duration,
        limit: usize,
    ) -> Result<Vec<EventRecord>>;

    /// Retrieves exhausted events awaiting manual reconciliation.
    async fn exhausted(&self, limit: usize) -> Result<Vec<EventRecord>>;

    /// Retrieves every event recorded for an order, in arrival order.
    async fn events_for_order(&self, order_id: OrderId) -> Result<Vec<EventRecord>>;
}
