//! Shared types for the order lifecycle

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ============================================================================
// Status Axes
// ============================================================================

/// Order lifecycle status.
///
/// Moves forward along `PENDING → PAID → (PROCESSING) → SHIPPED →
/// DELIVERED → COMPLETED`; `CANCELLED` is reachable from the first
/// three states only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[default]
    Pending,
    Paid,
    Processing,
    Shipped,
    Delivered,
    Completed,
    Cancelled,
}

impl OrderStatus {
    /// Whether a cancel trigger is allowed from this state.
    pub fn can_cancel(self) -> bool {
        matches!(
            self,
            OrderStatus::Pending | OrderStatus::Paid | OrderStatus::Processing
        )
    }

    /// Whether a ship trigger is allowed from this state.
    pub fn can_ship(self) -> bool {
        matches!(self, OrderStatus::Paid | OrderStatus::Processing)
    }

    /// Whether a direct transition to `to` is on the lifecycle graph.
    ///
    /// Used by the manual status override; the automatic triggers have
    /// their own dedicated guards.
    pub fn can_transition(self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        match self {
            Pending => matches!(to, Paid | Cancelled),
            Paid => matches!(to, Processing | Shipped | Cancelled),
            Processing => matches!(to, Shipped | Cancelled),
            Shipped => matches!(to, Delivered),
            Delivered => matches!(to, Completed),
            Completed | Cancelled => false,
        }
    }
}

/// Payment status - transitions UNPAID → PAID exactly once.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayStatus {
    #[default]
    Unpaid,
    Paid,
}

/// Shipment status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShipStatus {
    #[default]
    Unshipped,
    Shipped,
    Delivered,
}

/// Payment method selected at checkout.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    /// Online payment through the gateway (settled via callback)
    #[default]
    Gateway,
    /// Cash on delivery
    Cod,
}

/// Shipping method selected at checkout.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShippingMethod {
    /// Door-to-door courier
    #[default]
    Courier,
    /// Convenience-store pickup; requires a logistics-provider id
    CounterPickup,
}

impl ShippingMethod {
    pub fn is_counter_pickup(self) -> bool {
        matches!(self, ShippingMethod::CounterPickup)
    }
}

// ============================================================================
// Checkout Inputs
// ============================================================================

/// Receiver snapshot - copied onto the order at checkout, immutable after.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReceiverInfo {
    pub name: String,
    pub phone: String,
    pub address: String,
}

/// One requested order line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLineInput {
    /// SKU to purchase
    pub sku_id: String,
    /// Requested quantity (must be positive)
    pub quantity: u32,
    /// Unit price the buyer saw; rejected if the stored price moved
    pub expected_price: Decimal,
}

/// Checkout request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderInput {
    pub member_id: String,
    pub receiver: ReceiverInfo,
    pub payment_method: PaymentMethod,
    pub shipping_method: ShippingMethod,
    pub lines: Vec<OrderLineInput>,
}

// ============================================================================
// Payment Callback
// ============================================================================

/// Acknowledgement body returned when the callback references an
/// unknown order. Terminal from the gateway's perspective.
pub const CALLBACK_ACK_NOT_FOUND: &str = "failure:order not found";

/// One inbound payment-gateway notification.
///
/// Delivery is at-least-once: the gateway may post the same result
/// multiple times, concurrently or after a timed-out acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCallbackResult {
    /// Merchant reference (our order number)
    pub order_no: String,
    /// Gateway-side trade reference
    pub trade_no: String,
    /// Whether the gateway reports the payment as successful
    pub success: bool,
    /// Raw provider payload, stored verbatim for audit
    pub raw_payload: String,
    /// Body the gateway expects back, verbatim, fresh or duplicate
    pub ack_body: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_allowed_only_before_shipment() {
        assert!(OrderStatus::Pending.can_cancel());
        assert!(OrderStatus::Paid.can_cancel());
        assert!(OrderStatus::Processing.can_cancel());
        assert!(!OrderStatus::Shipped.can_cancel());
        assert!(!OrderStatus::Delivered.can_cancel());
        assert!(!OrderStatus::Completed.can_cancel());
        assert!(!OrderStatus::Cancelled.can_cancel());
    }

    #[test]
    fn ship_allowed_from_paid_and_processing_only() {
        assert!(OrderStatus::Paid.can_ship());
        assert!(OrderStatus::Processing.can_ship());
        assert!(!OrderStatus::Pending.can_ship());
        assert!(!OrderStatus::Shipped.can_ship());
        assert!(!OrderStatus::Cancelled.can_ship());
    }

    #[test]
    fn transition_graph_is_forward_only() {
        use OrderStatus::*;
        assert!(Pending.can_transition(Paid));
        assert!(Paid.can_transition(Processing));
        assert!(Paid.can_transition(Shipped));
        assert!(Processing.can_transition(Shipped));
        assert!(Shipped.can_transition(Delivered));
        assert!(Delivered.can_transition(Completed));

        // No backwards or skipping moves
        assert!(!Paid.can_transition(Pending));
        assert!(!Pending.can_transition(Shipped));
        assert!(!Shipped.can_transition(Completed));
        assert!(!Shipped.can_transition(Cancelled));
        assert!(!Completed.can_transition(Cancelled));
        assert!(!Cancelled.can_transition(Pending));
    }

    #[test]
    fn status_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&OrderStatus::Pending).unwrap();
        assert_eq!(json, "\"PENDING\"");
        let json = serde_json::to_string(&ShippingMethod::CounterPickup).unwrap();
        assert_eq!(json, "\"COUNTER_PICKUP\"");
    }
}
