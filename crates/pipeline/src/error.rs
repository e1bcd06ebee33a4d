//! Per-attempt failure taxonomy.

use common::{OrderId, Version};
use domain::{EventParseError, OrderError, RepositoryError};
use event_store::EventStoreError;
use thiserror::Error;

use crate::audit::AuditAction;
use crate::lock::LockError;

/// Why an attempt did not apply its event.
///
/// Every variant is either transient (retried with backoff until the budget
/// is spent) or permanent (the event is rejected).
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Event store error.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// Order repository error.
    #[error("Order repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Per-order lock error.
    #[error("Order lock error: {0}")]
    Lock(#[from] LockError),

    /// The requested transition is not allowed from the order's current state.
    #[error(transparent)]
    IllegalTransition(#[from] OrderError),

    /// The payload does not match its event type.
    #[error(transparent)]
    Malformed(#[from] EventParseError),

    /// A lifecycle event arrived without an order reference.
    #[error("Lifecycle event {event_type} has no order id")]
    MissingOrderId { event_type: String },

    /// The order does not exist yet; the event may have overtaken its creation.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// Other writers kept moving the version while this attempt reloaded.
    #[error("Version conflict on order {order_id} persisted after {reloads} reloads (now at {actual})")]
    VersionConflict {
        order_id: OrderId,
        reloads: u32,
        actual: Version,
    },
}

impl ProcessingError {
    /// Returns true if a later attempt may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ProcessingError::EventStore(e) => e.is_transient(),
            ProcessingError::Repository(RepositoryError::NotFound(_)) => true,
            ProcessingError::Repository(e) => e.is_transient(),
            ProcessingError::Lock(_) => true,
            ProcessingError::OrderNotFound(_) => true,
            ProcessingError::VersionConflict { .. } => true,
            ProcessingError::IllegalTransition(_)
            | ProcessingError::Malformed(_)
            | ProcessingError::MissingOrderId { .. } => false,
        }
    }

    /// Audit action for an attempt that failed with this error and was rescheduled.
    pub fn retry_action(&self) -> AuditAction {
        match self {
            ProcessingError::Lock(LockError::Timeout { .. }) => AuditAction::LockTimeout,
            ProcessingError::VersionConflict { .. } => AuditAction::VersionConflict,
            _ => AuditAction::RetryScheduled,
        }
    }

    /// Short label used in metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessingError::EventStore(_) => "event_store",
            ProcessingError::Repository(_) => "repository",
            ProcessingError::Lock(LockError::Timeout { .. }) => "lock_timeout",
            ProcessingError::Lock(_) => "lock",
            ProcessingError::IllegalTransition(OrderError::StaleEvent { .. }) => "stale_event",
            ProcessingError::IllegalTransition(_) => "illegal_transition",
            ProcessingError::Malformed(_) => "malformed",
            ProcessingError::MissingOrderId { .. } => "missing_order_id",
            ProcessingError::OrderNotFound(_) => "order_not_found",
            ProcessingError::VersionConflict { .. } => "version_conflict",
        }
    }
}

pub type Result<T> = std::result::Result<T, ProcessingError>;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use domain::OrderState;

    use super::*;
    use crate::lock::LockKey;

    #[test]
    fn illegal_transition_is_permanent() {
        let err = ProcessingError::from(OrderError::IllegalTransition {
            from: OrderState::Paid,
            to: OrderState::Paid,
        });
        assert!(!err.is_transient());
    }

    #[test]
    fn stale_event_is_permanent() {
        let err = ProcessingError::from(OrderError::StaleEvent {
            event_type: "payment_failed",
            state: OrderState::Shipped,
        });
        assert!(!err.is_transient());
        assert_eq!(err.kind(), "stale_event");
    }

    #[test]
    fn lock_timeout_is_transient_with_its_own_action() {
        let err = ProcessingError::from(LockError::Timeout {
            key: LockKey::for_order(OrderId::new()),
            timeout: Duration::from_millis(10),
        });
        assert!(err.is_transient());
        assert_eq!(err.retry_action(), AuditAction::LockTimeout);
    }

    #[test]
    fn storage_unavailable_is_transient() {
        let err = ProcessingError::from(RepositoryError::Unavailable("down".to_string()));
        assert!(err.is_transient());
        assert_eq!(err.retry_action(), AuditAction::RetryScheduled);
    }

    #[test]
    fn missing_order_is_transient() {
        assert!(ProcessingError::OrderNotFound(OrderId::new()).is_transient());
    }

    #[test]
    fn unresolved_version_conflict_is_transient() {
        let err = ProcessingError::VersionConflict {
            order_id: OrderId::new(),
            reloads: 3,
            actual: Version::new(7),
        };
        assert!(err.is_transient());
        assert_eq!(err.retry_action(), AuditAction::VersionConflict);
    }
}
