//! External stock ledger interface
//!
//! The ledger is owned by the inventory subsystem; the engine only
//! mirrors deductions and restorations into it. Calls are synchronous
//! so they can happen inside the engine's own transaction window: an
//! `Insufficient` reply aborts the caller's transaction and nothing is
//! committed on either side.

use parking_lot::Mutex;
use std::collections::HashMap;
use thiserror::Error;

/// Ledger errors
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Authoritative "not enough stock" from the ledger
    #[error("insufficient ledger stock for {0}")]
    Insufficient(String),

    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Atomic increment/decrement by ledger item reference.
pub trait StockLedger: Send + Sync {
    /// Deduct `qty` units; fails with `Insufficient` rather than going
    /// negative.
    fn deduct(&self, item_ref: &str, qty: u32) -> Result<(), LedgerError>;

    /// Restore `qty` units (compensation for an earlier deduction).
    fn restore(&self, item_ref: &str, qty: u32) -> Result<(), LedgerError>;
}

/// In-process ledger for tests and embedded deployments.
#[derive(Default)]
pub struct InMemoryStockLedger {
    entries: Mutex<HashMap<String, u64>>,
}

impl InMemoryStockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a ledger item with a starting quantity.
    pub fn set(&self, item_ref: &str, qty: u64) {
        self.entries.lock().insert(item_ref.to_string(), qty);
    }

    /// Current quantity for an item (0 if unknown).
    pub fn quantity(&self, item_ref: &str) -> u64 {
        self.entries.lock().get(item_ref).copied().unwrap_or(0)
    }
}

impl StockLedger for InMemoryStockLedger {
    fn deduct(&self, item_ref: &str, qty: u32) -> Result<(), LedgerError> {
        let mut entries = self.entries.lock();
        let Some(current) = entries.get_mut(item_ref) else {
            return Err(LedgerError::Unavailable(format!(
                "unknown ledger item {item_ref}"
            )));
        };
        if *current < u64::from(qty) {
            return Err(LedgerError::Insufficient(item_ref.to_string()));
        }
        *current -= u64::from(qty);
        Ok(())
    }

    fn restore(&self, item_ref: &str, qty: u32) -> Result<(), LedgerError> {
        let mut entries = self.entries.lock();
        *entries.entry(item_ref.to_string()).or_insert(0) += u64::from(qty);
        Ok(())
    }
}
