use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    ClaimOutcome, EventId, EventRecord, EventStatus, EventStoreError, InboundEvent, OrderId,
    RecordOutcome, Result, store::EventLog,
};

/// In-memory event log for tests and single-node deployments.
///
/// This implementation keeps all rows in memory and provides the same
/// semantics as the PostgreSQL implementation. The write lock around the map
/// plays the role of the primary key constraint.
#[derive(Clone, Default)]
pub struct InMemoryEventLog {
    events: Arc<RwLock<HashMap<EventId, EventRecord>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryEventLog {
    /// Creates a new empty in-memory event log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with `Unavailable` until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EventStoreError::Unavailable(
                "in-memory event log switched off".to_string(),
            ));
        }
        Ok(())
    }

    /// Applies `update` to a `Processing` row.
    async fn finish(
        &self,
        event_id: &EventId,
        action: &'static str,
        update: impl FnOnce(&mut EventRecord),
    ) -> Result<()> {
        self.check_available()?;
        let mut events = self.events.write().await;
        let record = events
            .get_mut(event_id)
            .ok_or_else(|| EventStoreError::NotFound(event_id.clone()))?;

        if record.status != EventStatus::Processing {
            return Err(EventStoreError::InvalidStatus {
                event_id: event_id.clone(),
                status: record.status,
                action,
            });
        }

        update(record);
        record.claimed_at = None;
        Ok(())
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn record(&self, event: InboundEvent) -> Result<RecordOutcome> {
        self.check_available()?;
        let mut events = self.events.write().await;

        if let Some(existing) = events.get(&event.event_id) {
            return Ok(RecordOutcome::Duplicate(existing.clone()));
        }

        let record = EventRecord::received(event);
        events.insert(record.event_id.clone(), record.clone());
        Ok(RecordOutcome::FirstSeen(record))
    }

    async fn claim(&self, event_id: &EventId, lease: Duration) -> Result<ClaimOutcome> {
        self.check_available()?;
        let now = Utc::now();
        let mut events = self.events.write().await;
        let record = events
            .get_mut(event_id)
            .ok_or_else(|| EventStoreError::NotFound(event_id.clone()))?;

        if !record.is_claimable(now, lease) {
            return Ok(ClaimOutcome::NotClaimable(record.clone()));
        }

        record.status = EventStatus::Processing;
        record.claimed_at = Some(now);
        Ok(ClaimOutcome::Claimed(record.clone()))
    }

    async fn mark_applied(&self, event_id: &EventId) -> Result<()> {
        self.finish(event_id, "mark applied", |record| {
            record.status = EventStatus::Applied;
            record.processed_at = Some(Utc::now());
            record.error_message = None;
            record.next_attempt_at = None;
        })
        .await
    }

    async fn mark_rejected(&self, event_id: &EventId, reason: &str) -> Result<()> {
        self.finish(event_id, "mark rejected", |record| {
            record.status = EventStatus::Rejected;
            record.processed_at = Some(Utc::now());
            record.error_message = Some(reason.to_string());
            record.next_attempt_at = None;
        })
        .await
    }

    async fn schedule_retry(
        &self,
        event_id: &EventId,
        retry_count: u32,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<()> {
        self.finish(event_id, "schedule retry", |record| {
            record.status = EventStatus::RetryScheduled;
            record.retry_count = retry_count;
            record.error_message = Some(error.to_string());
            record.next_attempt_at = Some(next_attempt_at);
        })
        .await
    }

    async fn mark_exhausted(
        &self,
        event_id: &EventId,
        retry_count: u32,
        error: &str,
    ) -> Result<()> {
        self.finish(event_id, "mark exhausted", |record| {
            record.status = EventStatus::Exhausted;
            record.retry_count = retry_count;
            record.processed_at = Some(Utc::now());
            record.error_message = Some(error.to_string());
            record.next_attempt_at = None;
        })
        .await
    }

    async fn requeue(&self, event_id: &EventId, at: DateTime<Utc>) -> Result<EventRecord> {
        self.check_available()?;
        let mut events = self.events.write().await;
        let record = events
            .get_mut(event_id)
            .ok_or_else(|| EventStoreError::NotFound(event_id.clone()))?;

        if record.status != EventStatus::Exhausted {
            return Err(EventStoreError::InvalidStatus {
                event_id: event_id.clone(),
                status: record.status,
                action: "requeue",
            });
        }

        record.status = EventStatus::RetryScheduled;
        record.retry_count = 0;
        record.processed_at = None;
        record.next_attempt_at = Some(at);
        Ok(record.clone())
    }

    async fn get(&self, event_id: &EventId) -> Result<Option<EventRecord>> {
        self.check_available()?;
        Ok(self.events.read().await.get(event_id).cloned())
    }

    async fn due_for_retry(
        &self,
        now: DateTime<Utc>,
        lease: Duration,
        limit: usize,
    ) -> Result<Vec<EventRecord>> {
        self.check_available()?;
        let events = self.events.read().await;
        let mut due: Vec<_> = events
            .values()
            .filter(|record| record.is_due(now, lease))
            .cloned()
            .collect();

        due.sort_by_key(|record| record.next_attempt_at.unwrap_or(record.received_at));
        due.truncate(limit);
        Ok(due)
    }

    async fn exhausted(&self, limit: usize) -> Result<Vec<EventRecord>> {
        self.check_available()?;
        let events = self.events.read().await;
        let mut exhausted: Vec<_> = events
            .values()
            .filter(|record| record.status == EventStatus::Exhausted)
            .cloned()
            .collect();

        exhausted.sort_by_key(|record| record.received_at);
        exhausted.truncate(limit);
        Ok(exhausted)
    }

    async fn events_for_order(&self, order_id: OrderId) -> Result<Vec<EventRecord>> {
        self.check_available()?;
        let events = self.events.read().await;
        let mut for_order: Vec<_> = events
            .values()
            .filter(|record| record.order_id == Some(order_id))
            .cloned()
            .collect();

        for_order.sort_by_key(|record| record.received_at);
        Ok(for_order)
    }
}
