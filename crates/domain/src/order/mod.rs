//! Order aggregate, its state machine, and the events that drive it.

mod aggregate;
mod events;
mod state;

pub use aggregate::Order;
pub use events::{
    DeliveredData, DisputeClosedData, DisputeCreatedData, FundsReleasedData, HandoverReadyData,
    LIFECYCLE_EVENT_TYPES, OrderCancelledData, PaymentEvent, PaymentFailedData,
    PaymentSucceededData, RefundedData, ShippedData,
};
pub use state::{OrderState, allowed};

use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// The requested transition is not an edge of the state machine.
    #[error("Illegal transition: {from} -> {to}")]
    IllegalTransition { from: OrderState, to: OrderState },

    /// The event no longer describes the order, e.g. a late failed payment.
    #[error("Stale event: {event_type} does not apply to an order in {state}")]
    StaleEvent {
        event_type: &'static str,
        state: OrderState,
    },
}

impl OrderError {
    /// The state the order was left in.
    pub fn current_state(&self) -> OrderState {
        match self {
            OrderError::IllegalTransition { from, .. } => *from,
            OrderError::StaleEvent { state, .. } => *state,
        }
    }
}
