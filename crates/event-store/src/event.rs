use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::{EventId, OrderId};

/// A validated, already-authenticated event descriptor handed to the pipeline
/// by the webhook transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Provider-assigned identity, used for deduplication.
    pub event_id: EventId,

    /// Provider event type, e.g. `payment_succeeded`.
    pub event_type: String,

    /// Order this event refers to; absent for non-order events.
    #[serde(default)]
    pub order_id: Option<OrderId>,

    /// The raw provider payload.
    #[serde(default = "empty_payload")]
    pub payload: serde_json::Value,

    /// When the transport received the event.
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

fn empty_payload() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl InboundEvent {
    /// Creates a descriptor received now.
    pub fn new(
        event_id: impl Into<EventId>,
        event_type: impl Into<String>,
        order_id: Option<OrderId>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            event_type: event_type.into(),
            order_id,
            payload,
            received_at: Utc::now(),
        }
    }
}

/// Processing status of a stored event.
///
/// ```text
/// Received ──► Processing ──┬──► Applied
///                  ▲        ├──► Rejected
///                  │        ├──► RetryScheduled ──┐
///                  └────────┼─────────────────────┘
///                           └──► Exhausted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Recorded on first sighting, no attempt has started yet.
    Received,

    /// An attempt currently holds the claim on this event.
    Processing,

    /// The event was applied (terminal).
    Applied,

    /// The event was rejected by a business rule (terminal, never retried).
    Rejected,

    /// A transient failure occurred and another attempt is scheduled.
    RetryScheduled,

    /// The retry budget is spent; needs manual reconciliation (terminal).
    Exhausted,
}

impl EventStatus {
    /// Returns true if no further attempt will be made for the event.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventStatus::Applied | EventStatus::Rejected | EventStatus::Exhausted
        )
    }

    /// Returns the status name as stored.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Received => "received",
            EventStatus::Processing => "processing",
            EventStatus::Applied => "applied",
            EventStatus::Rejected => "rejected",
            EventStatus::RetryScheduled => "retry_scheduled",
            EventStatus::Exhausted => "exhausted",
        }
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(EventStatus::Received),
            "processing" => Ok(EventStatus::Processing),
            "applied" => Ok(EventStatus::Applied),
            "rejected" => Ok(EventStatus::Rejected),
            "retry_scheduled" => Ok(EventStatus::RetryScheduled),
            "exhausted" => Ok(EventStatus::Exhausted),
            other => Err(format!("unknown event status: {other}")),
        }
    }
}

/// A stored event row: one externally generated fact plus its processing history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: EventId,
    pub event_type: String,
    pub order_id: Option<OrderId>,
    pub payload: serde_json::Value,
    pub status: EventStatus,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub claimed_at: Option<DateTime<Utc>>,
}

impl EventRecord {
    /// Builds the row written on first sighting of an inbound event.
    pub fn received(event: InboundEvent) -> Self {
        Self {
            event_id: event.event_id,
            event_type: event.event_type,
            order_id: event.order_id,
            payload: event.payload,
            status: EventStatus::Received,
            received_at: event.received_at,
            processed_at: None,
            retry_count: 0,
            error_message: None,
            next_attempt_at: None,
            claimed_at: None,
        }
    }

    /// Returns true if an attempt may claim this event at `now`.
    ///
    /// `Processing` rows become claimable again once their claim is older
    /// than `lease`, which recovers attempts that crashed mid-flight.
    pub fn is_claimable(&self, now: DateTime<Utc>, lease: Duration) -> bool {
        match self.status {
            EventStatus::Received | EventStatus::RetryScheduled => true,
            EventStatus::Processing => self
                .claimed_at
                .is_none_or(|claimed| claimed < stale_cutoff(now, lease)),
            _ => false,
        }
    }

    /// Returns true if the retry worker should pick this event up at `now`.
    pub fn is_due(&self, now: DateTime<Utc>, lease: Duration) -> bool {
        let cutoff = stale_cutoff(now, lease);
        match self.status {
            EventStatus::RetryScheduled => self.next_attempt_at.is_none_or(|at| at <= now),
            EventStatus::Received => self.received_at < cutoff,
            EventStatus::Processing => self.claimed_at.is_none_or(|claimed| claimed < cutoff),
            _ => false,
        }
    }
}

/// Result of recording an inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    /// The event id was never seen before; the row was inserted.
    FirstSeen(EventRecord),

    /// The event id already exists; the stored row is returned untouched.
    Duplicate(EventRecord),
}

impl RecordOutcome {
    pub fn record(&self) -> &EventRecord {
        match self {
            RecordOutcome::FirstSeen(record) | RecordOutcome::Duplicate(record) => record,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, RecordOutcome::Duplicate(_))
    }
}

/// Result of trying to claim an event for an attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// The claim was taken; the row is now `Processing`.
    Claimed(EventRecord),

    /// The event is terminal or another attempt holds a fresh claim.
    NotClaimable(EventRecord),
}

/// Instant before which a claim (or an unclaimed `Received` row) counts as stale.
pub fn stale_cutoff(now: DateTime<Utc>, lease: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(lease)
        .ok()
        .and_then(|lease| now.checked_sub_signed(lease))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
