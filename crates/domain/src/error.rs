//! Domain error types.

use common::{EventId, OrderId};
use thiserror::Error;

/// Errors raised by an order repository.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The backing store cannot be reached.
    #[error("Order repository unavailable: {0}")]
    Unavailable(String),

    /// No order exists with this id.
    #[error("Order not found: {0}")]
    NotFound(OrderId),

    /// An order with this id already exists.
    #[error("Order already exists: {0}")]
    AlreadyExists(OrderId),

    /// This event already moved an order.
    #[error("Event {0} already applied a transition")]
    DuplicateTransition(EventId),

    /// A stored row could not be decoded.
    #[error("Invalid order row: {0}")]
    InvalidRow(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl RepositoryError {
    /// Returns true if retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RepositoryError::Unavailable(_) | RepositoryError::Database(_)
        )
    }
}

/// A lifecycle event whose payload does not match its declared type.
#[derive(Debug, Error)]
pub enum EventParseError {
    #[error("Malformed {event_type} payload: {source}")]
    Malformed {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}
