//! Order lifecycle and payment-reconciliation engine
//!
//! Creates orders against limited stock, reconciles asynchronous
//! payment-gateway callbacks exactly once per event, and drives the
//! compensating and best-effort side effects (stock restoration, sales
//! counters, logistics creation) that follow.

pub mod gateway;
pub mod orders;

// Re-exports
pub use gateway::{
    GatewayError, InMemoryStockLedger, LedgerError, LogisticsGateway, MockLogisticsGateway,
    ShipmentReceipt, StockLedger,
};
pub use orders::{
    DeferredEffectsWorker, OrderError, OrderManager, OrderResult, OrderStorage, SkuStock,
    StorageError,
};
