//! Order events - after-commit notifications emitted by the engine
//!
//! Events are broadcast only once their owning transaction has
//! committed; an event for aborted work is never delivered. Consumers
//! must re-load the order fresh rather than trusting any snapshot
//! captured before the commit.

use serde::{Deserialize, Serialize};

/// One committed lifecycle transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderEvent {
    /// Event unique ID
    pub event_id: String,
    /// Order this event belongs to
    pub order_no: String,
    /// Server timestamp (Unix milliseconds)
    pub timestamp: i64,
    /// Event type
    pub event_type: OrderEventType,
}

impl OrderEvent {
    /// Build an event for a just-committed transition.
    pub fn new(order_no: impl Into<String>, event_type: OrderEventType) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            order_no: order_no.into(),
            timestamp: crate::util::now_millis(),
            event_type,
        }
    }
}

/// Event type enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderEventType {
    OrderCreated,
    /// Payment reconciled (callback or manual override); triggers the
    /// deferred sales-count and logistics consumers
    PaymentConfirmed,
    OrderCancelled,
    OrderShipped,
    OrderDelivered,
    OrderCompleted,
}

impl std::fmt::Display for OrderEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderEventType::OrderCreated => write!(f, "ORDER_CREATED"),
            OrderEventType::PaymentConfirmed => write!(f, "PAYMENT_CONFIRMED"),
            OrderEventType::OrderCancelled => write!(f, "ORDER_CANCELLED"),
            OrderEventType::OrderShipped => write!(f, "ORDER_SHIPPED"),
            OrderEventType::OrderDelivered => write!(f, "ORDER_DELIVERED"),
            OrderEventType::OrderCompleted => write!(f, "ORDER_COMPLETED"),
        }
    }
}
