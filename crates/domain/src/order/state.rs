//! Order state machine.

use serde::{Deserialize, Serialize};

/// The state of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// PendingPayment ──► Paid ──► ReadyForHandover ──► Shipped ──► Delivered ──► Released
///       │             │  └──► Refunded                 │           │
///       │             │                                │           │
///       └─────────────┴──────────┴─────────────────────┴───────────┴──► Cancelled
/// ```
///
/// `Released`, `Refunded` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    /// Sale resolved, waiting for the buyer's payment.
    #[default]
    PendingPayment,

    /// Payment captured by the provider.
    Paid,

    /// Seller has prepared the item for handover.
    ReadyForHandover,

    /// Item is on its way to the buyer.
    Shipped,

    /// Buyer received the item.
    Delivered,

    /// Funds released to the seller (terminal state).
    Released,

    /// Payment returned to the buyer (terminal state).
    Refunded,

    /// Order was cancelled (terminal state).
    Cancelled,
}

impl OrderState {
    /// Every state, in lifecycle order.
    pub const ALL: [OrderState; 8] = [
        OrderState::PendingPayment,
        OrderState::Paid,
        OrderState::ReadyForHandover,
        OrderState::Shipped,
        OrderState::Delivered,
        OrderState::Released,
        OrderState::Refunded,
        OrderState::Cancelled,
    ];

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::Released | OrderState::Refunded | OrderState::Cancelled
        )
    }

    /// Returns true if the order may move from this state to `requested`.
    pub fn can_transition_to(&self, requested: OrderState) -> bool {
        allowed(*self, requested)
    }

    /// Returns the state name as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::PendingPayment => "pending_payment",
            OrderState::Paid => "paid",
            OrderState::ReadyForHandover => "ready_for_handover",
            OrderState::Shipped => "shipped",
            OrderState::Delivered => "delivered",
            OrderState::Released => "released",
            OrderState::Refunded => "refunded",
            OrderState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("unknown order state: {s}"))
    }
}

/// The transition table: pure, total, and side-effect free.
///
/// A self-transition is never allowed, so a replayed fact for a state the
/// order is already in is rejected rather than re-applied.
pub fn allowed(current: OrderState, requested: OrderState) -> bool {
    use OrderState::*;

    match (current, requested) {
        (PendingPayment, Paid)
        | (Paid, ReadyForHandover)
        | (ReadyForHandover, Shipped)
        | (Shipped, Delivered)
        | (Delivered, Released)
        | (Paid, Refunded) => true,
        (from, Cancelled) => !from.is_terminal(),
        _ => false,
    }
}
