//! redb-based storage layer for orders and stock
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `orders` | `order_no` | `Order` | Order aggregates (JSON) |
//! | `sku_stock` | `sku_id` | `SkuStock` | Sellable stock per variant |
//! | `sales_count` | `sku_id` | `u64` | Deferred sales counters |
//! | `gift_stock` | `sku_id` | `u64` | Best-effort gift stock |
//!
//! Stock is only ever mutated through conditional updates inside a
//! write transaction: a decrement that would go negative fails instead
//! of writing, and the caller aborts the whole transaction by dropping
//! it uncommitted.

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::order::Order;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Table for order aggregates: key = order_no, value = JSON-serialized Order
const ORDERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("orders");

/// Table for SKU stock rows: key = sku_id, value = JSON-serialized SkuStock
const SKU_STOCK_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("sku_stock");

/// Table for sales counters: key = sku_id, value = units sold
const SALES_COUNT_TABLE: TableDefinition<&str, u64> = TableDefinition::new("sales_count");

/// Table for gift stock: key = sku_id, value = remaining gift units
const GIFT_STOCK_TABLE: TableDefinition<&str, u64> = TableDefinition::new("gift_stock");

/// One sellable variant owned by this subsystem.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkuStock {
    pub sku_id: String,
    pub product_id: String,
    /// Catalog name, snapshotted onto order items at checkout
    pub name: String,
    /// Current unit price
    pub price: Decimal,
    /// Sellable quantity; never goes negative
    pub quantity: u64,
    /// Reference into the external inventory ledger, if mirrored there
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger_item_id: Option<String>,
}

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Order storage backed by redb
#[derive(Clone)]
pub struct OrderStorage {
    db: Arc<Database>,
}

impl OrderStorage {
    /// Open or create the database at the given path.
    ///
    /// redb commits are durable as soon as `commit()` returns; the
    /// file is always in a consistent state after a crash.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let db = Database::create(path)?;
        let storage = Self { db: Arc::new(db) };
        storage.init_tables()?;
        Ok(storage)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> StorageResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        let storage = Self { db: Arc::new(db) };
        storage.init_tables()?;
        Ok(storage)
    }

    fn init_tables(&self) -> StorageResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let _ = write_txn.open_table(ORDERS_TABLE)?;
            let _ = write_txn.open_table(SKU_STOCK_TABLE)?;
            let _ = write_txn.open_table(SALES_COUNT_TABLE)?;
            let _ = write_txn.open_table(GIFT_STOCK_TABLE)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Begin a write transaction
    pub fn begin_write(&self) -> StorageResult<WriteTransaction> {
        Ok(self.db.begin_write()?)
    }

    // ========== Order Operations ==========

    /// Get an order by number (read-only)
    pub fn get_order(&self, order_no: &str) -> StorageResult<Option<Order>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ORDERS_TABLE)?;

        match table.get(order_no)? {
            Some(value) => {
                let order: Order = serde_json::from_slice(value.value())?;
                Ok(Some(order))
            }
            None => Ok(None),
        }
    }

    /// Get an order by number (within transaction)
    pub fn get_order_txn(
        &self,
        txn: &WriteTransaction,
        order_no: &str,
    ) -> StorageResult<Option<Order>> {
        let table = txn.open_table(ORDERS_TABLE)?;

        let result = match table.get(order_no)? {
            Some(value) => {
                let order: Order = serde_json::from_slice(value.value())?;
                Ok(Some(order))
            }
            None => Ok(None),
        };
        result
    }

    /// Check whether an order number is already taken (within transaction)
    pub fn order_exists_txn(&self, txn: &WriteTransaction, order_no: &str) -> StorageResult<bool> {
        let table = txn.open_table(ORDERS_TABLE)?;
        let exists = table.get(order_no)?.is_some();
        Ok(exists)
    }

    /// Store an order (insert or overwrite)
    pub fn put_order(&self, txn: &WriteTransaction, order: &Order) -> StorageResult<()> {
        let mut table = txn.open_table(ORDERS_TABLE)?;
        let value = serde_json::to_vec(order)?;
        table.insert(order.order_no.as_str(), value.as_slice())?;
        Ok(())
    }

    // ========== SKU Stock Operations ==========

    /// Get a SKU stock row (read-only)
    pub fn get_sku(&self, sku_id: &str) -> StorageResult<Option<SkuStock>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SKU_STOCK_TABLE)?;

        match table.get(sku_id)? {
            Some(value) => {
                let sku: SkuStock = serde_json::from_slice(value.value())?;
                Ok(Some(sku))
            }
            None => Ok(None),
        }
    }

    /// Get a SKU stock row (within transaction)
    pub fn get_sku_txn(
        &self,
        txn: &WriteTransaction,
        sku_id: &str,
    ) -> StorageResult<Option<SkuStock>> {
        let table = txn.open_table(SKU_STOCK_TABLE)?;

        let result = match table.get(sku_id)? {
            Some(value) => {
                let sku: SkuStock = serde_json::from_slice(value.value())?;
                Ok(Some(sku))
            }
            None => Ok(None),
        };
        result
    }

    /// Store a SKU stock row (within transaction)
    pub fn put_sku(&self, txn: &WriteTransaction, sku: &SkuStock) -> StorageResult<()> {
        let mut table = txn.open_table(SKU_STOCK_TABLE)?;
        let value = serde_json::to_vec(sku)?;
        table.insert(sku.sku_id.as_str(), value.as_slice())?;
        Ok(())
    }

    /// Store a SKU stock row in its own transaction (seeding)
    pub fn insert_sku(&self, sku: &SkuStock) -> StorageResult<()> {
        let txn = self.begin_write()?;
        self.put_sku(&txn, sku)?;
        txn.commit()?;
        Ok(())
    }

    /// Conditionally decrement SKU stock (within transaction).
    ///
    /// Returns `false` without writing when the row is missing or the
    /// remaining quantity is insufficient; the quantity never goes
    /// negative. Dropping the transaction uncommitted undoes any
    /// decrement already applied in it.
    pub fn decrement_stock_txn(
        &self,
        txn: &WriteTransaction,
        sku_id: &str,
        qty: u32,
    ) -> StorageResult<bool> {
        let mut table = txn.open_table(SKU_STOCK_TABLE)?;

        let sku_opt = match table.get(sku_id)? {
            Some(value) => {
                let sku: SkuStock = serde_json::from_slice(value.value())?;
                Some(sku)
            }
            None => None,
        };

        let Some(mut sku) = sku_opt else {
            return Ok(false);
        };
        if sku.quantity < u64::from(qty) {
            return Ok(false);
        }

        sku.quantity -= u64::from(qty);
        let value = serde_json::to_vec(&sku)?;
        table.insert(sku_id, value.as_slice())?;
        Ok(true)
    }

    /// Increment SKU stock (within transaction).
    ///
    /// Returns `false` when the row is missing so the caller can abort
    /// a restoration instead of resurrecting a deleted variant.
    pub fn increment_stock_txn(
        &self,
        txn: &WriteTransaction,
        sku_id: &str,
        qty: u32,
    ) -> StorageResult<bool> {
        let mut table = txn.open_table(SKU_STOCK_TABLE)?;

        let sku_opt = match table.get(sku_id)? {
            Some(value) => {
                let sku: SkuStock = serde_json::from_slice(value.value())?;
                Some(sku)
            }
            None => None,
        };

        let Some(mut sku) = sku_opt else {
            return Ok(false);
        };

        sku.quantity += u64::from(qty);
        let value = serde_json::to_vec(&sku)?;
        table.insert(sku_id, value.as_slice())?;
        Ok(true)
    }

    // ========== Sales Counters ==========

    /// Add to a SKU's sales counter (within transaction)
    pub fn add_sales_count_txn(
        &self,
        txn: &WriteTransaction,
        sku_id: &str,
        qty: u32,
    ) -> StorageResult<u64> {
        let mut table = txn.open_table(SALES_COUNT_TABLE)?;
        let current = table.get(sku_id)?.map(|g| g.value()).unwrap_or(0);
        let next = current + u64::from(qty);
        table.insert(sku_id, next)?;
        Ok(next)
    }

    /// Get a SKU's sales counter (read-only)
    pub fn sales_count(&self, sku_id: &str) -> StorageResult<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SALES_COUNT_TABLE)?;
        Ok(table.get(sku_id)?.map(|g| g.value()).unwrap_or(0))
    }

    // ========== Gift Stock ==========

    /// Set gift stock for a SKU (seeding)
    pub fn set_gift_stock(&self, sku_id: &str, qty: u64) -> StorageResult<()> {
        let txn = self.begin_write()?;
        {
            let mut table = txn.open_table(GIFT_STOCK_TABLE)?;
            table.insert(sku_id, qty)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Get gift stock for a SKU (read-only)
    pub fn gift_stock(&self, sku_id: &str) -> StorageResult<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(GIFT_STOCK_TABLE)?;
        Ok(table.get(sku_id)?.map(|g| g.value()).unwrap_or(0))
    }

    /// Best-effort gift stock decrement, clamped at zero.
    ///
    /// Runs in its own short transaction and returns `(before, after)`
    /// so the caller can log a clamp; it never fails a shipment.
    pub fn decrement_gift_stock(&self, sku_id: &str, qty: u32) -> StorageResult<(u64, u64)> {
        let txn = self.begin_write()?;
        let (before, after) = {
            let mut table = txn.open_table(GIFT_STOCK_TABLE)?;
            let before = table.get(sku_id)?.map(|g| g.value()).unwrap_or(0);
            let after = before.saturating_sub(u64::from(qty));
            table.insert(sku_id, after)?;
            (before, after)
        };
        txn.commit()?;
        Ok((before, after))
    }
}
