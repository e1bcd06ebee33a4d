//! Applies provider events to orders exactly once.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, TimeDelta, Utc};
use common::{EventId, OrderId, Version};
use domain::{OrderRepository, OrderState, PaymentEvent, TransitionWrite};
use event_store::{ClaimOutcome, EventLog, EventRecord, InboundEvent, RecordOutcome};
use serde_json::json;

use crate::audit::{AuditAction, AuditLog, AuditRecord};
use crate::backend::Backend;
use crate::config::PipelineConfig;
use crate::error::{ProcessingError, Result};
use crate::lock::{LockError, with_order_lock};
use crate::notify::{Notification, NotificationOutcome, NotificationSink};
use crate::outcome::Outcome;
use crate::retry::RetryDecision;

/// Where an attempt left the order.
struct Transitioned {
    state: OrderState,
    version: Version,
    conflict_reloads: u32,
    /// An earlier attempt had already written this event's transition.
    recovered: bool,
}

/// Orchestrates a single event through the pipeline.
///
/// An attempt runs:
/// 1. `record` the event (the dedup gate) and `claim` it for this attempt
/// 2. parse it into a [`PaymentEvent`]
/// 3. take the per-order lock, load the order, validate the event against
///    it, and write with the version guard, reloading on conflicts
/// 4. settle the event row (`applied`, `rejected`, `retry_scheduled`, or
///    `exhausted`) and append exactly one audit record
/// 5. notify the sink, after the lock is released
///
/// Safe to call concurrently for any mix of events and orders.
pub struct EventProcessor<B: Backend> {
    events: B::Events,
    orders: B::Orders,
    lock: B::Lock,
    audit: B::Audit,
    notifier: Arc<dyn NotificationSink>,
    config: PipelineConfig,
}

impl<B: Backend> EventProcessor<B> {
    pub fn new(
        events: B::Events,
        orders: B::Orders,
        lock: B::Lock,
        audit: B::Audit,
        notifier: Arc<dyn NotificationSink>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            events,
            orders,
            lock,
            audit,
            notifier,
            config,
        }
    }

    pub fn events(&self) -> &B::Events {
        &self.events
    }

    pub fn orders(&self) -> &B::Orders {
        &self.orders
    }

    pub fn audit_log(&self) -> &B::Audit {
        &self.audit
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Handles one delivery from the transport.
    ///
    /// A redelivery of a settled event is answered as a duplicate without
    /// touching the order. A redelivery of an unsettled one (received,
    /// scheduled for retry, or abandoned mid-flight) gets a fresh attempt.
    ///
    /// Returns `Err` only when the event's own bookkeeping fails, in which
    /// case the caller should ask for redelivery.
    #[tracing::instrument(
        skip(self, event),
        fields(event_id = %event.event_id, event_type = %event.event_type)
    )]
    pub async fn process(&self, event: InboundEvent) -> Result<Outcome> {
        let record = match self.events.record(event).await? {
            RecordOutcome::FirstSeen(record) => record,
            RecordOutcome::Duplicate(existing) if existing.status.is_terminal() => {
                return Ok(self.duplicate(&existing).await);
            }
            RecordOutcome::Duplicate(existing) => {
                tracing::debug!(status = %existing.status, "redelivery of an unsettled event");
                existing
            }
        };

        match self
            .events
            .claim(&record.event_id, self.config.processing_lease)
            .await?
        {
            ClaimOutcome::Claimed(claimed) => self.attempt(claimed).await,
            ClaimOutcome::NotClaimable(current) => Ok(self.duplicate(&current).await),
        }
    }

    /// Re-runs a stored event; used by the retry worker.
    ///
    /// An event that is settled or claimed by someone else is skipped and
    /// reported as a duplicate without an audit record.
    #[tracing::instrument(skip(self))]
    pub async fn retry(&self, event_id: &EventId) -> Result<Outcome> {
        match self
            .events
            .claim(event_id, self.config.processing_lease)
            .await?
        {
            ClaimOutcome::Claimed(claimed) => self.attempt(claimed).await,
            ClaimOutcome::NotClaimable(current) => {
                tracing::debug!(status = %current.status, "event no longer claimable, skipping");
                Ok(Outcome::Duplicate {
                    status: current.status,
                })
            }
        }
    }

    /// Operator action: moves an exhausted event back into the retry queue.
    #[tracing::instrument(skip(self))]
    pub async fn requeue(&self, event_id: &EventId) -> Result<EventRecord> {
        let record = self.events.requeue(event_id, Utc::now()).await?;

        self.append_audit(
            AuditRecord::new(AuditAction::Requeued, record.event_id.clone(), record.order_id)
                .with_detail(json!({ "next_attempt_at": record.next_attempt_at })),
        )
        .await;
        tracing::info!("exhausted event requeued");

        Ok(record)
    }

    async fn attempt(&self, record: EventRecord) -> Result<Outcome> {
        let started = Instant::now();

        let result = self.apply(&record).await;
        let outcome = match self.settle(&record, result).await {
            Ok(outcome) => outcome,
            Err(error) => {
                // The row stays claimed; the lease expiry makes it due again
                self.append_audit(
                    AuditRecord::new(
                        error.retry_action(),
                        record.event_id.clone(),
                        record.order_id,
                    )
                    .with_detail(json!({
                        "retry_count": record.retry_count,
                        "error": error.to_string(),
                        "kind": error.kind(),
                        "stage": "settle",
                    })),
                )
                .await;
                tracing::error!(error = %error, "failed to settle event");
                return Err(error);
            }
        };

        metrics::counter!("pipeline_events_total", "outcome" => outcome.label()).increment(1);
        metrics::histogram!("pipeline_attempt_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        Ok(outcome)
    }

    /// Runs the order side of an attempt. `Ok(None)` means the event is not
    /// a lifecycle event and has no order side.
    async fn apply(&self, record: &EventRecord) -> Result<Option<Transitioned>> {
        let Some(event) = PaymentEvent::parse(&record.event_type, &record.payload)? else {
            tracing::debug!("not a lifecycle event");
            return Ok(None);
        };

        let order_id = record
            .order_id
            .ok_or_else(|| ProcessingError::MissingOrderId {
                event_type: record.event_type.clone(),
            })?;

        let transitioned = with_order_lock(&self.lock, order_id, self.config.lock_timeout, || {
            self.transition(&record.event_id, order_id, &event)
        })
        .await??;

        Ok(Some(transitioned))
    }

    /// Load, validate, write; on a version conflict start over from a fresh load.
    async fn transition(
        &self,
        event_id: &EventId,
        order_id: OrderId,
        event: &PaymentEvent,
    ) -> Result<Transitioned> {
        // An earlier attempt may have moved the order and then failed to settle
        if let Some(applied) = self.orders.applied_transition(event_id).await? {
            tracing::info!(%order_id, version = %applied.version, "transition already written");
            return Ok(Transitioned {
                state: applied.state,
                version: applied.version,
                conflict_reloads: 0,
                recovered: true,
            });
        }

        let mut reloads = 0;

        loop {
            let order = self
                .orders
                .load(order_id)
                .await?
                .ok_or(ProcessingError::OrderNotFound(order_id))?;

            let Some(requested) = order.check_event(event)? else {
                tracing::debug!(
                    %order_id,
                    state = %order.state(),
                    "event acknowledged without a transition"
                );
                return Ok(Transitioned {
                    state: order.state(),
                    version: order.version(),
                    conflict_reloads: reloads,
                    recovered: false,
                });
            };

            match self
                .orders
                .apply_transition(order_id, order.version(), requested, event_id)
                .await?
            {
                TransitionWrite::Applied(order) => {
                    return Ok(Transitioned {
                        state: order.state(),
                        version: order.version(),
                        conflict_reloads: reloads,
                        recovered: false,
                    });
                }
                TransitionWrite::VersionConflict { actual } => {
                    metrics::counter!("pipeline_version_conflicts_total").increment(1);
                    if reloads >= self.config.max_conflict_reloads {
                        return Err(ProcessingError::VersionConflict {
                            order_id,
                            reloads,
                            actual,
                        });
                    }
                    reloads += 1;
                    tracing::debug!(
                        %order_id,
                        expected = %order.version(),
                        %actual,
                        reloads,
                        "version conflict, reloading order"
                    );
                }
            }
        }
    }

    async fn settle(
        &self,
        record: &EventRecord,
        result: Result<Option<Transitioned>>,
    ) -> Result<Outcome> {
        let event_id = &record.event_id;

        match result {
            Ok(transitioned) => {
                self.events.mark_applied(event_id).await?;

                let state = transitioned.as_ref().map(|t| t.state);
                let version = transitioned.as_ref().map(|t| t.version);
                let conflict_reloads = transitioned.as_ref().map_or(0, |t| t.conflict_reloads);
                let recovered = transitioned.as_ref().is_some_and(|t| t.recovered);

                self.append_audit(
                    AuditRecord::new(AuditAction::Applied, event_id.clone(), record.order_id)
                        .with_state(state)
                        .with_detail(json!({
                            "version": version,
                            "retry_count": record.retry_count,
                            "conflict_reloads": conflict_reloads,
                            "recovered": recovered,
                        })),
                )
                .await;
                tracing::info!(order_id = ?record.order_id, resulting_state = ?state, "event applied");

                self.notify(record, NotificationOutcome::Applied, state)
                    .await;
                Ok(Outcome::Applied { state, version })
            }
            Err(error) if !error.is_transient() => {
                let reason = error.to_string();
                self.events.mark_rejected(event_id, &reason).await?;

                // The order did not move, so its current state is the resulting one
                let current = match &error {
                    ProcessingError::IllegalTransition(e) => Some(e.current_state()),
                    _ => None,
                };

                self.append_audit(
                    AuditRecord::new(AuditAction::Rejected, event_id.clone(), record.order_id)
                        .with_state(current)
                        .with_detail(json!({ "reason": reason, "kind": error.kind() })),
                )
                .await;
                tracing::warn!(order_id = ?record.order_id, error = %error, "event rejected");

                self.notify(record, NotificationOutcome::Rejected, current)
                    .await;
                Ok(Outcome::Rejected { reason })
            }
            Err(error) => self.reschedule(record, error).await,
        }
    }

    async fn reschedule(&self, record: &EventRecord, error: ProcessingError) -> Result<Outcome> {
        let message = error.to_string();
        if matches!(error, ProcessingError::Lock(LockError::Timeout { .. })) {
            metrics::counter!("pipeline_lock_timeouts_total").increment(1);
        }

        match self.config.retry.decide(record.retry_count) {
            RetryDecision::Retry { retry_count, delay } => {
                let now = Utc::now();
                let next_attempt_at = TimeDelta::from_std(delay)
                    .ok()
                    .and_then(|delay| now.checked_add_signed(delay))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);

                self.events
                    .schedule_retry(&record.event_id, retry_count, &message, next_attempt_at)
                    .await?;

                self.append_audit(
                    AuditRecord::new(
                        error.retry_action(),
                        record.event_id.clone(),
                        record.order_id,
                    )
                    .with_detail(json!({
                        "retry_count": retry_count,
                        "next_attempt_at": next_attempt_at,
                        "error": message,
                        "kind": error.kind(),
                    })),
                )
                .await;
                tracing::warn!(
                    error = %error,
                    retry_count,
                    %next_attempt_at,
                    "transient failure, retry scheduled"
                );

                Ok(Outcome::RetryScheduled {
                    retry_count,
                    next_attempt_at,
                    error: message,
                })
            }
            RetryDecision::Exhausted { retry_count } => {
                self.events
                    .mark_exhausted(&record.event_id, retry_count, &message)
                    .await?;

                self.append_audit(
                    AuditRecord::new(
                        AuditAction::Exhausted,
                        record.event_id.clone(),
                        record.order_id,
                    )
                    .with_detail(json!({
                        "retry_count": retry_count,
                        "error": message,
                        "kind": error.kind(),
                    })),
                )
                .await;
                tracing::error!(
                    order_id = ?record.order_id,
                    error = %error,
                    retry_count,
                    "retries exhausted, event needs manual reconciliation"
                );

                self.notify(record, NotificationOutcome::Exhausted, None)
                    .await;
                Ok(Outcome::Exhausted {
                    retry_count,
                    error: message,
                })
            }
        }
    }

    async fn duplicate(&self, record: &EventRecord) -> Outcome {
        self.append_audit(
            AuditRecord::new(
                AuditAction::Duplicate,
                record.event_id.clone(),
                record.order_id,
            )
            .with_detail(json!({ "status": record.status })),
        )
        .await;
        metrics::counter!("pipeline_events_total", "outcome" => "duplicate").increment(1);
        tracing::debug!(status = %record.status, "duplicate delivery");

        Outcome::Duplicate {
            status: record.status,
        }
    }

    /// Audit failures are counted and logged, never propagated.
    async fn append_audit(&self, record: AuditRecord) {
        let action = record.action;
        if let Err(e) = self.audit.append(record).await {
            metrics::counter!("pipeline_audit_failures_total").increment(1);
            tracing::error!(%action, error = %e, "failed to append audit record");
        }
    }

    async fn notify(
        &self,
        record: &EventRecord,
        outcome: NotificationOutcome,
        resulting_state: Option<OrderState>,
    ) {
        let notification = Notification {
            order_id: record.order_id,
            event_id: record.event_id.clone(),
            event_type: record.event_type.clone(),
            outcome,
            resulting_state,
        };

        let delivered = tokio::time::timeout(
            self.config.notify_timeout,
            self.notifier.notify(&notification),
        )
        .await;

        match delivered {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                metrics::counter!("pipeline_notification_failures_total").increment(1);
                tracing::warn!(error = %e, "notification failed");
            }
            Err(_) => {
                metrics::counter!("pipeline_notification_failures_total").increment(1);
                tracing::warn!(
                    timeout = ?self.config.notify_timeout,
                    "notification timed out"
                );
            }
        }
    }
}
