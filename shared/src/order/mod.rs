//! Order Lifecycle Module
//!
//! This module provides types for the order lifecycle engine:
//! - Types: status enums, inputs, and the payment callback shape
//! - Snapshot: the persisted order aggregate and its line items
//! - Events: after-commit notifications emitted by the engine

pub mod event;
pub mod snapshot;
pub mod types;

// Re-exports
pub use event::{OrderEvent, OrderEventType};
pub use snapshot::{Order, OrderItem};
pub use types::*;
