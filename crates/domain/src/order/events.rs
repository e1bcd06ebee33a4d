//! Provider events that drive order transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::EventParseError;

use super::OrderState;

/// Event types that request an order transition.
///
/// Anything outside this list is acknowledged without touching an order.
pub const LIFECYCLE_EVENT_TYPES: [&str; 10] = [
    "payment_succeeded",
    "payment_failed",
    "dispute_created",
    "dispute_closed",
    "refunded",
    "handover_ready",
    "shipped",
    "delivered",
    "funds_released",
    "order_cancelled",
];

/// A lifecycle event from the payment provider or the marketplace.
///
/// The wire form is `{"type": "<event_type>", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PaymentEvent {
    /// The provider captured the buyer's payment.
    PaymentSucceeded(PaymentSucceededData),

    /// The provider failed to capture the payment.
    PaymentFailed(PaymentFailedData),

    /// The buyer opened a dispute.
    DisputeCreated(DisputeCreatedData),

    /// A dispute was closed by the provider.
    DisputeClosed(DisputeClosedData),

    /// The payment was refunded to the buyer.
    Refunded(RefundedData),

    /// The seller marked the item ready for handover.
    HandoverReady(HandoverReadyData),

    /// The item was shipped.
    Shipped(ShippedData),

    /// The buyer received the item.
    Delivered(DeliveredData),

    /// Funds were released to the seller.
    FundsReleased(FundsReleasedData),

    /// The order was cancelled by the marketplace.
    OrderCancelled(OrderCancelledData),
}

impl PaymentEvent {
    /// Parses a stored event into its typed form.
    ///
    /// Returns `Ok(None)` for event types that carry no order transition.
    pub fn parse(event_type: &str, payload: &Value) -> Result<Option<Self>, EventParseError> {
        if !LIFECYCLE_EVENT_TYPES.contains(&event_type) {
            return Ok(None);
        }

        let tagged = json!({ "type": event_type, "data": payload });
        serde_json::from_value(tagged)
            .map(Some)
            .map_err(|source| EventParseError::Malformed {
                event_type: event_type.to_string(),
                source,
            })
    }

    /// Returns the event type name as it appears on the wire.
    pub fn event_type(&self) -> &'static str {
        match self {
            PaymentEvent::PaymentSucceeded(_) => "payment_succeeded",
            PaymentEvent::PaymentFailed(_) => "payment_failed",
            PaymentEvent::DisputeCreated(_) => "dispute_created",
            PaymentEvent::DisputeClosed(_) => "dispute_closed",
            PaymentEvent::Refunded(_) => "refunded",
            PaymentEvent::HandoverReady(_) => "handover_ready",
            PaymentEvent::Shipped(_) => "shipped",
            PaymentEvent::Delivered(_) => "delivered",
            PaymentEvent::FundsReleased(_) => "funds_released",
            PaymentEvent::OrderCancelled(_) => "order_cancelled",
        }
    }

    /// The state this event asks the order to move to.
    ///
    /// `None` means the event is acknowledged against the order without
    /// moving it: an opened dispute, or a dispute the seller won.
    pub fn requested_state(&self) -> Option<OrderState> {
        match self {
            PaymentEvent::PaymentSucceeded(_) => Some(OrderState::Paid),
            PaymentEvent::PaymentFailed(_) | PaymentEvent::OrderCancelled(_) => {
                Some(OrderState::Cancelled)
            }
            PaymentEvent::DisputeCreated(_) => None,
            PaymentEvent::DisputeClosed(data) if data.is_lost() => Some(OrderState::Refunded),
            PaymentEvent::DisputeClosed(_) => None,
            PaymentEvent::Refunded(_) => Some(OrderState::Refunded),
            PaymentEvent::HandoverReady(_) => Some(OrderState::ReadyForHandover),
            PaymentEvent::Shipped(_) => Some(OrderState::Shipped),
            PaymentEvent::Delivered(_) => Some(OrderState::Delivered),
            PaymentEvent::FundsReleased(_) => Some(OrderState::Released),
        }
    }

    /// Returns true if the event can still describe an order in `current`.
    ///
    /// This is checked on top of the transition table. A failed payment only
    /// means something while the order waits for payment, and disputes only
    /// exist once funds were captured. Anything else is a stale delivery.
    pub fn fires_from(&self, current: OrderState) -> bool {
        match self {
            PaymentEvent::PaymentFailed(_) => current == OrderState::PendingPayment,
            PaymentEvent::DisputeCreated(_) | PaymentEvent::DisputeClosed(_) => matches!(
                current,
                OrderState::Paid
                    | OrderState::ReadyForHandover
                    | OrderState::Shipped
                    | OrderState::Delivered
                    | OrderState::Released
            ),
            _ => true,
        }
    }
}

/// Data for PaymentSucceeded event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentSucceededData {
    pub payment_intent_id: String,
    pub amount_cents: i64,
    pub currency: String,
}

/// Data for PaymentFailed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentFailedData {
    pub payment_intent_id: String,
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
}

/// Data for DisputeCreated event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisputeCreatedData {
    pub dispute_id: String,
    pub reason: Option<String>,
}

/// Data for DisputeClosed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisputeClosedData {
    pub dispute_id: String,
    /// Provider's dispute resolution, e.g. `won` or `lost`.
    pub status: String,
}

impl DisputeClosedData {
    /// Returns true if the buyer won, so the funds go back to them.
    pub fn is_lost(&self) -> bool {
        self.status.eq_ignore_ascii_case("lost")
    }
}

/// Data for Refunded event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundedData {
    pub refund_id: String,
    pub amount_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoverReadyData {
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShippedData {
    pub carrier: Option<String>,
    pub tracking_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveredData {
    pub delivered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundsReleasedData {
    pub payout_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCancelledData {
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_payment_succeeded() {
        let payload = json!({
            "payment_intent_id": "pi_123",
            "amount_cents": 4200,
            "currency": "eur"
        });

        let event = PaymentEvent::parse("payment_succeeded", &payload)
            .unwrap()
            .unwrap();

        assert_eq!(event.event_type(), "payment_succeeded");
        assert_eq!(event.requested_state(), Some(OrderState::Paid));
        match event {
            PaymentEvent::PaymentSucceeded(data) => {
                assert_eq!(data.payment_intent_id, "pi_123");
                assert_eq!(data.amount_cents, 4200);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn parse_accepts_missing_optional_fields() {
        let event = PaymentEvent::parse("shipped", &json!({})).unwrap().unwrap();
        assert_eq!(event.requested_state(), Some(OrderState::Shipped));
    }

    #[test]
    fn parse_unknown_type_is_not_lifecycle() {
        let parsed = PaymentEvent::parse("customer.updated", &json!({"id": 1})).unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn parse_rejects_malformed_payload() {
        let err = PaymentEvent::parse("refunded", &json!({"refund_id": "re_1"})).unwrap_err();
        assert!(matches!(err, EventParseError::Malformed { ref event_type, .. } if event_type == "refunded"));
    }

    #[test]
    fn every_lifecycle_type_has_a_requested_state() {
        let payloads = [
            json!({"payment_intent_id": "pi", "amount_cents": 1, "currency": "eur"}),
            json!({"payment_intent_id": "pi"}),
            json!({"dispute_id": "dp"}),
            json!({"dispute_id": "dp", "status": "lost"}),
            json!({"refund_id": "re", "amount_cents": 1}),
            json!({}),
            json!({}),
            json!({}),
            json!({}),
            json!({}),
        ];
        let expected = [
            Some(OrderState::Paid),
            Some(OrderState::Cancelled),
            None,
            Some(OrderState::Refunded),
            Some(OrderState::Refunded),
            Some(OrderState::ReadyForHandover),
            Some(OrderState::Shipped),
            Some(OrderState::Delivered),
            Some(OrderState::Released),
            Some(OrderState::Cancelled),
        ];

        for ((event_type, payload), state) in
            LIFECYCLE_EVENT_TYPES.iter().zip(payloads).zip(expected)
        {
            let event = PaymentEvent::parse(event_type, &payload).unwrap().unwrap();
            assert_eq!(event.event_type(), *event_type);
            assert_eq!(event.requested_state(), state, "{event_type}");
        }
    }

    fn dispute_closed(status: &str) -> PaymentEvent {
        PaymentEvent::parse(
            "dispute_closed",
            &json!({"dispute_id": "dp_1", "status": status}),
        )
        .unwrap()
        .unwrap()
    }

    #[test]
    fn dispute_closed_refunds_only_when_lost() {
        assert_eq!(
            dispute_closed("lost").requested_state(),
            Some(OrderState::Refunded)
        );
        assert_eq!(dispute_closed("won").requested_state(), None);
        assert_eq!(dispute_closed("warning_closed").requested_state(), None);
    }

    #[test]
    fn payment_failed_only_fires_while_pending() {
        let event = PaymentEvent::parse("payment_failed", &json!({"payment_intent_id": "pi"}))
            .unwrap()
            .unwrap();

        for state in OrderState::ALL {
            assert_eq!(
                event.fires_from(state),
                state == OrderState::PendingPayment,
                "{state}"
            );
        }
    }

    #[test]
    fn disputes_need_captured_funds() {
        let created = PaymentEvent::parse("dispute_created", &json!({"dispute_id": "dp"}))
            .unwrap()
            .unwrap();

        assert!(!created.fires_from(OrderState::PendingPayment));
        assert!(created.fires_from(OrderState::Paid));
        assert!(created.fires_from(OrderState::Delivered));
        assert!(!created.fires_from(OrderState::Cancelled));
        assert!(!dispute_closed("lost").fires_from(OrderState::Refunded));
    }
}
