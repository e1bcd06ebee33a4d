use chrono::{DateTime, Utc};
use common::Version;
use domain::OrderState;
use event_store::EventStatus;
use serde::Serialize;

/// Result of handing one event to the processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Already handled, or being handled by another attempt right now.
    Duplicate { status: EventStatus },

    /// Applied. `state` and `version` are absent for events that touch no order.
    Applied {
        state: Option<OrderState>,
        version: Option<Version>,
    },

    /// Broke a business rule; will never be retried.
    Rejected { reason: String },

    /// Failed transiently; another attempt is scheduled.
    RetryScheduled {
        retry_count: u32,
        next_attempt_at: DateTime<Utc>,
        error: String,
    },

    /// The retry budget is spent; needs manual reconciliation.
    Exhausted { retry_count: u32, error: String },
}

impl Outcome {
    /// Label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Duplicate { .. } => "duplicate",
            Outcome::Applied { .. } => "applied",
            Outcome::Rejected { .. } => "rejected",
            Outcome::RetryScheduled { .. } => "retry_scheduled",
            Outcome::Exhausted { .. } => "exhausted",
        }
    }
}
