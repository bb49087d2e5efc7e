//! Order Lifecycle Module
//!
//! - **manager**: `OrderManager` - order creation, state transitions,
//!   payment-callback reconciliation
//! - **storage**: redb-based persistence for orders, SKU stock, sales
//!   counters, and gift stock
//! - **dispatcher**: after-commit consumer for sales counters and
//!   logistics creation
//!
//! # Payment Callback Flow
//!
//! ```text
//! handle_payment_callback(result)
//!     ├─ 1. Acquire per-order lock
//!     ├─ 2. Order missing → not-found ack, no state change
//!     ├─ 3. Already PAID → ack_body verbatim, zero writes
//!     ├─ 4. Gateway failure report → ack_body, no state change
//!     ├─ 5. Apply UNPAID→PAID in one write transaction
//!     ├─ 6. Commit
//!     ├─ 7. Broadcast PaymentConfirmed (after commit only)
//!     └─ 8. Return ack_body
//! ```

pub mod dispatcher;
pub mod manager;
pub mod storage;

// Re-exports
pub use dispatcher::DeferredEffectsWorker;
pub use manager::{OrderError, OrderManager, OrderResult};
pub use storage::{OrderStorage, SkuStock, StorageError, StorageResult};

// Re-export shared types for convenience
pub use shared::order::{
    CreateOrderInput, Order, OrderEvent, OrderEventType, OrderItem, OrderLineInput, OrderStatus,
    PayStatus, PaymentCallbackResult, ShipStatus, ShippingMethod,
};
