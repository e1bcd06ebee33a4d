use thiserror::Error;

use crate::{EventId, EventStatus};

/// Errors that can occur when interacting with the event store.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The backing storage cannot be reached.
    #[error("Event store unavailable: {0}")]
    Unavailable(String),

    /// The event was never recorded.
    #[error("Event not found: {0}")]
    NotFound(EventId),

    /// The requested status change is not allowed from the stored status.
    #[error("Event {event_id} is {status}, cannot {action}")]
    InvalidStatus {
        event_id: EventId,
        status: EventStatus,
        action: &'static str,
    },

    /// A stored row could not be decoded.
    #[error("Invalid event row: {0}")]
    InvalidRow(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl EventStoreError {
    /// Returns true if retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EventStoreError::Unavailable(_) | EventStoreError::Database(_)
        )
    }
}

/// Result type for event store operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;
