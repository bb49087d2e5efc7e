//! External collaborator interfaces
//!
//! - **stock_ledger**: the independently-owned inventory ledger,
//!   mirrored inside the engine's transaction boundary
//! - **logistics**: the remote logistics provider, called outside any
//!   transaction and allowed to fail independently

pub mod logistics;
pub mod stock_ledger;

// Re-exports
pub use logistics::{GatewayError, LogisticsGateway, MockLogisticsGateway, ShipmentReceipt};
pub use stock_ledger::{InMemoryStockLedger, LedgerError, StockLedger};
