//! Order aggregate - one JSON row per order in the store
//!
//! The order carries three independent state axes (lifecycle, payment,
//! shipment) plus a lifecycle timestamp per transition. Each timestamp
//! is set exactly once when the corresponding transition happens,
//! never before and never overwritten.

use super::types::{
    OrderStatus, PayStatus, PaymentMethod, ReceiverInfo, ShipStatus, ShippingMethod,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order line - immutable once the order is created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderItem {
    /// SKU purchased
    pub sku_id: String,
    /// Owning product
    pub product_id: String,
    /// Name snapshot, independent of later catalog changes
    pub name: String,
    /// Unit price snapshot
    pub unit_price: Decimal,
    /// Quantity purchased
    pub quantity: u32,
    /// `unit_price * quantity`
    pub line_total: Decimal,
    /// Link into the external inventory ledger, if the SKU has one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger_item_id: Option<String>,
}

/// Order aggregate root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    /// Externally-facing order number (20 chars, gateway-safe)
    pub order_no: String,
    /// Buyer
    pub member_id: String,
    /// Lifecycle status
    pub status: OrderStatus,
    /// Payment status (UNPAID → PAID exactly once)
    pub pay_status: PayStatus,
    /// Shipment status
    pub ship_status: ShipStatus,
    /// Sum of line totals
    pub product_amount: Decimal,
    /// Shipping fee (0 above the free-shipping threshold)
    pub shipping_amount: Decimal,
    /// Discount applied at checkout
    pub discount_amount: Decimal,
    /// `product_amount + shipping_amount - discount_amount`
    pub total_amount: Decimal,
    /// Receiver snapshot, immutable after checkout
    pub receiver: ReceiverInfo,
    pub payment_method: PaymentMethod,
    pub shipping_method: ShippingMethod,
    /// Gateway trade reference, set by the payment callback
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trade_no: Option<String>,
    /// Raw gateway payload, stored verbatim for audit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_payload: Option<String>,
    /// Logistics-provider id (counter pickup)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logistics_id: Option<String>,
    /// Carrier tracking number, set at shipment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracking_no: Option<String>,
    /// Operator-supplied cancellation reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
    /// Order lines
    pub items: Vec<OrderItem>,
    // Lifecycle timestamps (UTC millis), each set exactly once
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipped_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<i64>,
}

impl Order {
    /// Check if the payment callback already landed.
    pub fn is_paid(&self) -> bool {
        self.pay_status == PayStatus::Paid
    }

    /// Sum of line totals.
    pub fn item_total(&self) -> Decimal {
        self.items.iter().map(|i| i.line_total).sum()
    }

    /// Monetary invariant: `total = product + shipping - discount` and
    /// the lines sum to `product_amount`.
    pub fn amounts_consistent(&self) -> bool {
        self.total_amount == self.product_amount + self.shipping_amount - self.discount_amount
            && self.item_total() == self.product_amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_order() -> Order {
        let item = OrderItem {
            sku_id: "sku-1".to_string(),
            product_id: "prod-1".to_string(),
            name: "Widget".to_string(),
            unit_price: Decimal::from(250),
            quantity: 2,
            line_total: Decimal::from(500),
            ledger_item_id: None,
        };
        Order {
            order_no: "S250825120000ABCDEFG".to_string(),
            member_id: "m-1".to_string(),
            status: OrderStatus::Pending,
            pay_status: PayStatus::Unpaid,
            ship_status: ShipStatus::Unshipped,
            product_amount: Decimal::from(500),
            shipping_amount: Decimal::from(60),
            discount_amount: Decimal::ZERO,
            total_amount: Decimal::from(560),
            receiver: ReceiverInfo {
                name: "Ada".to_string(),
                phone: "555-0100".to_string(),
                address: "1 Engine Way".to_string(),
            },
            payment_method: PaymentMethod::Gateway,
            shipping_method: ShippingMethod::Courier,
            trade_no: None,
            raw_payload: None,
            logistics_id: None,
            tracking_no: None,
            cancel_reason: None,
            items: vec![item],
            created_at: crate::util::now_millis(),
            paid_at: None,
            shipped_at: None,
            received_at: None,
            completed_at: None,
            cancelled_at: None,
        }
    }

    #[test]
    fn amounts_invariant_holds() {
        let order = sample_order();
        assert!(order.amounts_consistent());
    }

    #[test]
    fn amounts_invariant_detects_drift() {
        let mut order = sample_order();
        order.total_amount = Decimal::from(999);
        assert!(!order.amounts_consistent());
    }

    #[test]
    fn order_roundtrips_through_json() {
        let order = sample_order();
        let json = serde_json::to_vec(&order).unwrap();
        let back: Order = serde_json::from_slice(&json).unwrap();
        assert_eq!(back, order);
    }
}
