//! Order aggregate.

use chrono::{DateTime, Utc};
use common::{OrderId, Version};
use serde::{Deserialize, Serialize};

use super::{OrderError, OrderState, PaymentEvent};

/// The payment/fulfillment aggregate of a sale.
///
/// Orders are only ever mutated through validated transitions; each accepted
/// transition produces a new value with the version bumped by exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    state: OrderState,
    version: Version,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Order {
    /// Creates an order at `PendingPayment`, version 0.
    pub fn new(id: OrderId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            state: OrderState::PendingPayment,
            version: Version::initial(),
            created_at,
            updated_at: created_at,
        }
    }

    /// Rebuilds an order from stored fields.
    pub fn from_parts(
        id: OrderId,
        state: OrderState,
        version: Version,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            state,
            version,
            created_at,
            updated_at,
        }
    }

    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn state(&self) -> OrderState {
        self.state
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Validates a requested transition against the current state.
    pub fn check_transition(&self, requested: OrderState) -> Result<(), OrderError> {
        if self.state.can_transition_to(requested) {
            Ok(())
        } else {
            Err(OrderError::IllegalTransition {
                from: self.state,
                to: requested,
            })
        }
    }

    /// Validates an event against the current state.
    ///
    /// Returns the state to write, or `None` if the event is acknowledged
    /// without a transition.
    pub fn check_event(&self, event: &PaymentEvent) -> Result<Option<OrderState>, OrderError> {
        if !event.fires_from(self.state) {
            return Err(OrderError::StaleEvent {
                event_type: event.event_type(),
                state: self.state,
            });
        }

        match event.requested_state() {
            Some(requested) => {
                self.check_transition(requested)?;
                Ok(Some(requested))
            }
            None => Ok(None),
        }
    }

    /// Returns the order after moving to `new_state`.
    ///
    /// Does not validate; repositories call this once the caller has checked
    /// the transition and the version guard has matched.
    pub fn transitioned(&self, new_state: OrderState, at: DateTime<Utc>) -> Self {
        Self {
            state: new_state,
            version: self.version.next(),
            updated_at: at,
            ..self.clone()
        }
    }
}
