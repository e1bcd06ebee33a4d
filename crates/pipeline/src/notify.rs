//! Outbound notifications about settled events.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use common::{EventId, OrderId};
use domain::OrderState;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How an event settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationOutcome {
    Applied,
    Rejected,
    Exhausted,
}

/// Message sent to the notification sink after an event settles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub order_id: Option<OrderId>,
    pub event_id: EventId,
    pub event_type: String,
    pub outcome: NotificationOutcome,
    pub resulting_state: Option<OrderState>,
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

/// Downstream consumer of settled events (user-facing notifications, KPIs).
///
/// Delivery is best effort: the processor bounds each call with a timeout
/// and never lets a failure here affect the event's outcome.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotificationError>;
}

/// Sink that only writes a log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotificationSink;

#[async_trait]
impl NotificationSink for TracingNotificationSink {
    async fn notify(&self, notification: &Notification) -> Result<(), NotificationError> {
        tracing::info!(
            event_id = %notification.event_id,
            event_type = %notification.event_type,
            order_id = ?notification.order_id,
            outcome = ?notification.outcome,
            resulting_state = ?notification.resulting_state,
            "order notification"
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
struct InMemoryNotificationState {
    sent: Vec<Notification>,
    fail: bool,
    delay: Option<Duration>,
}

/// In-memory sink for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotificationSink {
    state: Arc<RwLock<InMemoryNotificationState>>,
}

impl InMemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the sink to fail every call.
    pub fn set_fail(&self, fail: bool) {
        self.write().fail = fail;
    }

    /// Makes every call wait before answering.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.write().delay = delay;
    }

    /// Notifications accepted so far.
    pub fn sent(&self) -> Vec<Notification> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .sent
            .clone()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, InMemoryNotificationState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl NotificationSink for InMemoryNotificationSink {
    async fn notify(&self, notification: &Notification) -> Result<(), NotificationError> {
        let delay = self.write().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.write();
        if state.fail {
            return Err(NotificationError::Delivery(
                "notification sink refused the message".to_string(),
            ));
        }
        state.sent.push(notification.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification() -> Notification {
        Notification {
            order_id: Some(OrderId::new()),
            event_id: EventId::from("evt_1"),
            event_type: "payment_succeeded".to_string(),
            outcome: NotificationOutcome::Applied,
            resulting_state: Some(OrderState::Paid),
        }
    }

    #[tokio::test]
    async fn in_memory_sink_records_notifications() {
        let sink = InMemoryNotificationSink::new();
        sink.notify(&notification()).await.unwrap();
        assert_eq!(sink.sent().len(), 1);
    }

    #[tokio::test]
    async fn in_memory_sink_failure_switch() {
        let sink = InMemoryNotificationSink::new();
        sink.set_fail(true);
        assert!(sink.notify(&notification()).await.is_err());
        assert!(sink.sent().is_empty());
    }

    #[tokio::test]
    async fn tracing_sink_always_succeeds() {
        assert!(
            TracingNotificationSink
                .notify(&notification())
                .await
                .is_ok()
        );
    }
}
