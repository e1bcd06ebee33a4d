//! Order persistence with optimistic version checks.

mod memory;
mod postgres;

pub use memory::InMemoryOrderRepository;
pub use postgres::PostgresOrderRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{EventId, OrderId, Version};
use serde::{Deserialize, Serialize};

use crate::error::RepositoryError;
use crate::order::{Order, OrderState};

pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Result of a version-guarded write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionWrite {
    /// The write matched the expected version; holds the updated order.
    Applied(Order),

    /// Another writer got there first; nothing was written.
    VersionConflict { actual: Version },
}

/// An accepted transition and the event that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedTransition {
    pub event_id: EventId,
    pub order_id: OrderId,
    /// State the order moved to.
    pub state: OrderState,
    /// Version the order reached.
    pub version: Version,
    pub applied_at: DateTime<Utc>,
}

/// Stores orders and guards every write with the version the caller read.
///
/// The repository does not validate transitions; callers check
/// [`Order::check_transition`] against the version they loaded and pass
/// that version back as `expected_version`.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Creates an order in `PendingPayment` at version 0.
    async fn create(&self, order_id: OrderId) -> Result<Order>;

    /// Loads an order by id.
    async fn load(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Writes `new_state` only if the stored version equals `expected_version`.
    ///
    /// On success the stored version becomes `expected_version + 1`, and the
    /// transition is recorded under `event_id` in the same atomic write.
    /// Returns `NotFound` if the order does not exist and
    /// `DuplicateTransition` if `event_id` already moved an order.
    async fn apply_transition(
        &self,
        order_id: OrderId,
        expected_version: Version,
        new_state: OrderState,
        event_id: &EventId,
    ) -> Result<TransitionWrite>;

    /// Finds the transition an event caused, if any.
    async fn applied_transition(&self, event_id: &EventId) -> Result<Option<AppliedTransition>>;

    /// Every transition of an order, oldest first.
    async fn transitions(&self, order_id: OrderId) -> Result<Vec<AppliedTransition>>;
}
