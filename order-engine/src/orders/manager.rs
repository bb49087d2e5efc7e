//! OrderManager - order lifecycle and payment reconciliation
//!
//! All shared mutable state (SKU stock rows, the order row) is touched
//! either through conditional single-statement updates or under the
//! per-order lock. Events are broadcast only after the owning
//! transaction commits.

use crate::gateway::{LedgerError, LogisticsGateway, StockLedger};
use crate::orders::storage::{OrderStorage, StorageError};
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use shared::order::{
    CreateOrderInput, Order, OrderEvent, OrderEventType, OrderItem, OrderStatus, PayStatus,
    PaymentCallbackResult, ShipStatus, CALLBACK_ACK_NOT_FOUND,
};
use shared::util::{generate_order_no, now_millis};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

/// Event broadcast channel capacity
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Order-number type prefix for sales orders
const ORDER_NO_PREFIX: char = 'S';

/// Regeneration attempts before giving up on an order-number collision
const MAX_ORDER_NO_ATTEMPTS: u32 = 5;

/// Orders at or above this product amount ship free
const FREE_SHIPPING_THRESHOLD: Decimal = Decimal::from_parts(1000, 0, 0, false, 0);

/// Flat shipping fee below the free-shipping threshold
const FLAT_SHIPPING_FEE: Decimal = Decimal::from_parts(60, 0, 0, false, 0);

/// Manager errors
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Sku not found: {0}")]
    SkuNotFound(String),

    #[error("Order has no items")]
    EmptyOrder,

    #[error("Invalid quantity for sku {0}")]
    InvalidQuantity(String),

    #[error("Price changed for sku {0}")]
    PriceChanged(String),

    #[error("Insufficient stock for sku {0}")]
    InsufficientStock(String),

    #[error("Operation `{trigger}` not allowed from status {from:?}")]
    StateConflict {
        from: OrderStatus,
        trigger: &'static str,
    },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Logistics creation failed: {0}")]
    LogisticsFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

pub type OrderResult<T> = Result<T, OrderError>;

/// Shipping fee for a given product amount.
fn shipping_fee(product_amount: Decimal) -> Decimal {
    if product_amount >= FREE_SHIPPING_THRESHOLD {
        Decimal::ZERO
    } else {
        FLAT_SHIPPING_FEE
    }
}

/// After-commit event for a lifecycle target, if the target has one.
fn event_type_for(to: OrderStatus) -> Option<OrderEventType> {
    match to {
        OrderStatus::Paid => Some(OrderEventType::PaymentConfirmed),
        OrderStatus::Shipped => Some(OrderEventType::OrderShipped),
        OrderStatus::Delivered => Some(OrderEventType::OrderDelivered),
        OrderStatus::Completed => Some(OrderEventType::OrderCompleted),
        OrderStatus::Cancelled => Some(OrderEventType::OrderCancelled),
        OrderStatus::Pending | OrderStatus::Processing => None,
    }
}

/// Order lifecycle manager.
///
/// The lock registry serializes all state changes to one order (the
/// row lock); unrelated orders never block each other.
pub struct OrderManager {
    storage: OrderStorage,
    locks: DashMap<String, Arc<Mutex<()>>>,
    event_tx: broadcast::Sender<OrderEvent>,
    stock_ledger: Arc<dyn StockLedger>,
    logistics: Arc<dyn LogisticsGateway>,
}

impl OrderManager {
    pub fn new(
        storage: OrderStorage,
        stock_ledger: Arc<dyn StockLedger>,
        logistics: Arc<dyn LogisticsGateway>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            storage,
            locks: DashMap::new(),
            event_tx,
            stock_ledger,
            logistics,
        }
    }

    /// Subscribe to after-commit event broadcasts
    pub fn subscribe(&self) -> broadcast::Receiver<OrderEvent> {
        self.event_tx.subscribe()
    }

    /// Get the underlying storage
    pub fn storage(&self) -> &OrderStorage {
        &self.storage
    }

    /// Get an order by number
    pub fn get_order(&self, order_no: &str) -> OrderResult<Option<Order>> {
        Ok(self.storage.get_order(order_no)?)
    }

    /// Run `f` under the per-order lock (the row lock), evicting the
    /// registry entry afterwards when no other holder remains.
    fn with_order_lock<T>(&self, order_no: &str, f: impl FnOnce() -> T) -> T {
        let lock = self
            .locks
            .entry(order_no.to_string())
            .or_default()
            .clone();
        let result = {
            let _guard = lock.lock();
            f()
        };
        drop(lock);
        // A racing clone takes the same shard lock as this check, so
        // strong_count == 1 really means only the registry's handle.
        self.locks
            .remove_if(order_no, |_, entry| Arc::strong_count(entry) == 1);
        result
    }

    fn broadcast(&self, order_no: &str, event_type: Option<OrderEventType>) {
        if let Some(event_type) = event_type {
            let _ = self.event_tx.send(OrderEvent::new(order_no, event_type));
        }
    }

    // ========== Creation ==========

    /// Create an order against limited stock.
    ///
    /// Both ledgers (SKU rows and the external stock ledger) are
    /// updated inside one transaction boundary: any insufficient
    /// stock, on either side, aborts the whole creation with nothing
    /// committed. A commit failure after the external ledger accepted
    /// the deduction is compensated with best-effort restores.
    pub fn create_order(&self, input: CreateOrderInput) -> OrderResult<Order> {
        if input.lines.is_empty() {
            return Err(OrderError::EmptyOrder);
        }
        for line in &input.lines {
            if line.quantity == 0 {
                return Err(OrderError::InvalidQuantity(line.sku_id.clone()));
            }
        }

        let txn = self.storage.begin_write()?;

        // Conditional SKU decrements; dropping the transaction on any
        // failure below undoes all of them at once.
        let mut items = Vec::with_capacity(input.lines.len());
        for line in &input.lines {
            let sku = self
                .storage
                .get_sku_txn(&txn, &line.sku_id)?
                .ok_or_else(|| OrderError::SkuNotFound(line.sku_id.clone()))?;
            if sku.price != line.expected_price {
                return Err(OrderError::PriceChanged(line.sku_id.clone()));
            }
            if !self.storage.decrement_stock_txn(&txn, &line.sku_id, line.quantity)? {
                return Err(OrderError::InsufficientStock(line.sku_id.clone()));
            }
            items.push(OrderItem {
                sku_id: sku.sku_id.clone(),
                product_id: sku.product_id.clone(),
                name: sku.name.clone(),
                unit_price: sku.price,
                quantity: line.quantity,
                line_total: sku.price * Decimal::from(line.quantity),
                ledger_item_id: sku.ledger_item_id.clone(),
            });
        }

        // Mirror the deduction into the external ledger. A refusal
        // aborts the transaction; deductions already mirrored are
        // compensated before returning.
        let mut deducted: Vec<(String, u32)> = Vec::new();
        for item in &items {
            let Some(ledger_ref) = item.ledger_item_id.as_deref() else {
                continue;
            };
            match self.stock_ledger.deduct(ledger_ref, item.quantity) {
                Ok(()) => deducted.push((ledger_ref.to_string(), item.quantity)),
                Err(e) => {
                    self.compensate_ledger_deductions(&deducted);
                    return Err(e.into());
                }
            }
        }

        let product_amount: Decimal = items.iter().map(|i| i.line_total).sum();
        let shipping_amount = shipping_fee(product_amount);
        let discount_amount = Decimal::ZERO;
        let total_amount = product_amount + shipping_amount - discount_amount;

        // Probabilistic order numbers: re-check the store and
        // regenerate on the rare collision.
        let mut order_no = generate_order_no(ORDER_NO_PREFIX);
        let mut attempts = 0;
        while self.storage.order_exists_txn(&txn, &order_no)? {
            attempts += 1;
            if attempts >= MAX_ORDER_NO_ATTEMPTS {
                self.compensate_ledger_deductions(&deducted);
                return Err(OrderError::Internal(
                    "order number generation exhausted".to_string(),
                ));
            }
            order_no = generate_order_no(ORDER_NO_PREFIX);
        }

        let order = Order {
            order_no,
            member_id: input.member_id,
            status: OrderStatus::Pending,
            pay_status: PayStatus::Unpaid,
            ship_status: ShipStatus::Unshipped,
            product_amount,
            shipping_amount,
            discount_amount,
            total_amount,
            receiver: input.receiver,
            payment_method: input.payment_method,
            shipping_method: input.shipping_method,
            trade_no: None,
            raw_payload: None,
            logistics_id: None,
            tracking_no: None,
            cancel_reason: None,
            items,
            created_at: now_millis(),
            paid_at: None,
            shipped_at: None,
            received_at: None,
            completed_at: None,
            cancelled_at: None,
        };
        self.storage.put_order(&txn, &order)?;

        if let Err(e) = txn.commit() {
            self.compensate_ledger_deductions(&deducted);
            return Err(StorageError::from(e).into());
        }

        tracing::info!(
            order_no = %order.order_no,
            member_id = %order.member_id,
            total = %order.total_amount,
            "Order created"
        );
        self.broadcast(&order.order_no, Some(OrderEventType::OrderCreated));
        Ok(order)
    }

    /// Best-effort undo of external ledger deductions after an abort.
    fn compensate_ledger_deductions(&self, deducted: &[(String, u32)]) {
        for (ledger_ref, qty) in deducted {
            if let Err(e) = self.stock_ledger.restore(ledger_ref, *qty) {
                tracing::error!(
                    ledger_ref = %ledger_ref,
                    qty,
                    error = %e,
                    "Failed to compensate ledger deduction"
                );
            }
        }
    }

    /// Best-effort undo of external ledger restorations after an abort.
    fn compensate_ledger_restores(&self, restored: &[(String, u32)]) {
        for (ledger_ref, qty) in restored {
            if let Err(e) = self.stock_ledger.deduct(ledger_ref, *qty) {
                tracing::error!(
                    ledger_ref = %ledger_ref,
                    qty,
                    error = %e,
                    "Failed to compensate ledger restoration"
                );
            }
        }
    }

    // ========== State Machine ==========

    /// Apply a lifecycle transition to the aggregate, setting the
    /// status axes and the once-only timestamp for the target state.
    fn apply_status(
        order: &mut Order,
        to: OrderStatus,
        trigger: &'static str,
        now: i64,
    ) -> OrderResult<()> {
        if !order.status.can_transition(to) {
            return Err(OrderError::StateConflict {
                from: order.status,
                trigger,
            });
        }
        order.status = to;
        match to {
            OrderStatus::Paid => {
                order.pay_status = PayStatus::Paid;
                order.paid_at = Some(now);
            }
            OrderStatus::Processing => {}
            OrderStatus::Shipped => {
                order.ship_status = ShipStatus::Shipped;
                order.shipped_at = Some(now);
            }
            OrderStatus::Delivered => {
                order.ship_status = ShipStatus::Delivered;
                order.received_at = Some(now);
            }
            OrderStatus::Completed => {
                order.completed_at = Some(now);
            }
            OrderStatus::Cancelled => {
                order.cancelled_at = Some(now);
            }
            OrderStatus::Pending => unreachable!("no transition targets PENDING"),
        }
        Ok(())
    }

    /// Run one guarded transition under the order lock in one
    /// transaction, broadcasting the matching event after commit.
    fn transition(
        &self,
        order_no: &str,
        to: OrderStatus,
        trigger: &'static str,
        mutate: impl FnOnce(&mut Order),
    ) -> OrderResult<Order> {
        self.with_order_lock(order_no, || {
            let txn = self.storage.begin_write()?;
            let mut order = self
                .storage
                .get_order_txn(&txn, order_no)?
                .ok_or_else(|| OrderError::OrderNotFound(order_no.to_string()))?;
            Self::apply_status(&mut order, to, trigger, now_millis())?;
            mutate(&mut order);
            self.storage.put_order(&txn, &order)?;
            txn.commit().map_err(StorageError::from)?;

            tracing::info!(order_no = %order.order_no, status = ?order.status, trigger, "Order transition applied");
            self.broadcast(&order.order_no, event_type_for(to));
            Ok(order)
        })
    }

    /// Manual payment confirmation (operator override).
    pub fn pay_order(&self, order_no: &str) -> OrderResult<Order> {
        self.transition(order_no, OrderStatus::Paid, "pay", |_| {})
    }

    /// Ship with a carrier tracking number.
    pub fn ship_order(&self, order_no: &str, tracking_no: &str) -> OrderResult<Order> {
        let tracking = tracking_no.to_string();
        let order = self.transition(order_no, OrderStatus::Shipped, "ship", |o| {
            o.tracking_no = Some(tracking);
        })?;
        self.decrement_gift_stock_best_effort(&order);
        Ok(order)
    }

    /// Confirm receipt.
    pub fn deliver_order(&self, order_no: &str) -> OrderResult<Order> {
        self.transition(order_no, OrderStatus::Delivered, "deliver", |_| {})
    }

    /// Close out a delivered order.
    pub fn complete_order(&self, order_no: &str) -> OrderResult<Order> {
        self.transition(order_no, OrderStatus::Completed, "complete", |_| {})
    }

    /// Manual lifecycle override with the same guards as the automatic
    /// triggers. Cancellation is excluded because it restores stock;
    /// use [`cancel_order`](Self::cancel_order).
    pub fn update_order_status(&self, order_no: &str, to: OrderStatus) -> OrderResult<Order> {
        match to {
            OrderStatus::Cancelled => Err(OrderError::InvalidOperation(
                "cancellation requires a reason; use cancel_order".to_string(),
            )),
            OrderStatus::Pending => Err(OrderError::InvalidOperation(
                "orders cannot return to PENDING".to_string(),
            )),
            OrderStatus::Shipped => {
                let order = self.transition(order_no, to, "update_status", |_| {})?;
                self.decrement_gift_stock_best_effort(&order);
                Ok(order)
            }
            _ => self.transition(order_no, to, "update_status", |_| {}),
        }
    }

    /// Manual pay-status override.
    pub fn update_pay_status(&self, order_no: &str, target: PayStatus) -> OrderResult<Order> {
        match target {
            PayStatus::Paid => self.pay_order(order_no),
            PayStatus::Unpaid => Err(OrderError::InvalidOperation(
                "payment cannot be reverted to UNPAID".to_string(),
            )),
        }
    }

    /// Manual ship-status override.
    pub fn update_ship_status(&self, order_no: &str, target: ShipStatus) -> OrderResult<Order> {
        match target {
            ShipStatus::Shipped => self.update_order_status(order_no, OrderStatus::Shipped),
            ShipStatus::Delivered => self.deliver_order(order_no),
            ShipStatus::Unshipped => Err(OrderError::InvalidOperation(
                "shipment cannot be reverted to UNSHIPPED".to_string(),
            )),
        }
    }

    // ========== Cancellation ==========

    /// Cancel an order, restoring stock in both ledgers.
    ///
    /// Allowed from PENDING, PAID, and PROCESSING only. Any failed
    /// restoration aborts the entire cancellation; ledger restores
    /// already mirrored are compensated before returning.
    pub fn cancel_order(&self, order_no: &str, reason: &str) -> OrderResult<Order> {
        self.with_order_lock(order_no, || {
            let txn = self.storage.begin_write()?;
            let mut order = self
                .storage
                .get_order_txn(&txn, order_no)?
                .ok_or_else(|| OrderError::OrderNotFound(order_no.to_string()))?;
            if !order.status.can_cancel() {
                return Err(OrderError::StateConflict {
                    from: order.status,
                    trigger: "cancel",
                });
            }

            // Restore SKU stock; a missing row aborts the whole thing.
            for item in &order.items {
                if !self.storage.increment_stock_txn(&txn, &item.sku_id, item.quantity)? {
                    return Err(OrderError::SkuNotFound(item.sku_id.clone()));
                }
            }

            // Mirror the restoration into the external ledger.
            let mut restored: Vec<(String, u32)> = Vec::new();
            for item in &order.items {
                let Some(ledger_ref) = item.ledger_item_id.as_deref() else {
                    continue;
                };
                match self.stock_ledger.restore(ledger_ref, item.quantity) {
                    Ok(()) => restored.push((ledger_ref.to_string(), item.quantity)),
                    Err(e) => {
                        self.compensate_ledger_restores(&restored);
                        return Err(e.into());
                    }
                }
            }

            Self::apply_status(&mut order, OrderStatus::Cancelled, "cancel", now_millis())?;
            order.cancel_reason = Some(reason.to_string());
            self.storage.put_order(&txn, &order)?;

            if let Err(e) = txn.commit() {
                self.compensate_ledger_restores(&restored);
                return Err(StorageError::from(e).into());
            }

            tracing::info!(order_no = %order.order_no, reason, "Order cancelled");
            self.broadcast(&order.order_no, Some(OrderEventType::OrderCancelled));
            Ok(order)
        })
    }

    // ========== Payment Callback ==========

    /// Reconcile one inbound gateway notification.
    ///
    /// Safe under at-least-once delivery: the per-order lock plus the
    /// PAID check guarantee at most one transition and at most one
    /// broadcast event per order, no matter how many duplicates arrive
    /// or how they interleave. Always returns a well-formed
    /// acknowledgement so the gateway's retry loop is never left
    /// ambiguous.
    pub fn handle_payment_callback(&self, result: &PaymentCallbackResult) -> String {
        match self.process_payment_callback(result) {
            Ok(ack) => ack,
            Err(e) => {
                tracing::error!(order_no = %result.order_no, error = %e, "Payment callback failed");
                format!("failure:{e}")
            }
        }
    }

    fn process_payment_callback(&self, result: &PaymentCallbackResult) -> OrderResult<String> {
        self.with_order_lock(&result.order_no, || {
            let Some(order) = self.storage.get_order(&result.order_no)? else {
                tracing::warn!(order_no = %result.order_no, "Payment callback for unknown order");
                return Ok(CALLBACK_ACK_NOT_FOUND.to_string());
            };

            // Idempotency: duplicates are invisible past this point.
            if order.is_paid() {
                tracing::warn!(order_no = %result.order_no, "Duplicate payment callback");
                return Ok(result.ack_body.clone());
            }

            if !result.success {
                tracing::warn!(
                    order_no = %result.order_no,
                    trade_no = %result.trade_no,
                    "Gateway reported payment failure"
                );
                return Ok(result.ack_body.clone());
            }

            if order.status != OrderStatus::Pending {
                // Unpaid but no longer payable (e.g. cancelled while the
                // buyer sat on the payment page). Acknowledge so the
                // gateway stops retrying.
                tracing::error!(
                    order_no = %result.order_no,
                    status = ?order.status,
                    "Payment callback for unpayable order"
                );
                return Ok(result.ack_body.clone());
            }

            let txn = self.storage.begin_write()?;
            let mut order = self
                .storage
                .get_order_txn(&txn, &result.order_no)?
                .ok_or_else(|| OrderError::OrderNotFound(result.order_no.clone()))?;
            Self::apply_status(&mut order, OrderStatus::Paid, "payment_callback", now_millis())?;
            order.trade_no = Some(result.trade_no.clone());
            order.raw_payload = Some(result.raw_payload.clone());
            self.storage.put_order(&txn, &order)?;
            txn.commit().map_err(StorageError::from)?;

            tracing::info!(
                order_no = %order.order_no,
                trade_no = %result.trade_no,
                "Payment reconciled"
            );
            self.broadcast(&order.order_no, Some(OrderEventType::PaymentConfirmed));
            Ok(result.ack_body.clone())
        })
    }

    // ========== Manual Recovery ==========

    /// Re-create the logistics record after a failed deferred attempt.
    ///
    /// Only for PAID counter-pickup orders; gateway error text is
    /// surfaced to the operator, not retried silently.
    pub async fn recreate_logistics(&self, order_no: &str) -> OrderResult<String> {
        let order = self
            .with_order_lock(order_no, || self.storage.get_order(order_no))?
            .ok_or_else(|| OrderError::OrderNotFound(order_no.to_string()))?;

        if order.status != OrderStatus::Paid {
            return Err(OrderError::StateConflict {
                from: order.status,
                trigger: "recreate_logistics",
            });
        }
        if !order.shipping_method.is_counter_pickup() {
            return Err(OrderError::InvalidOperation(
                "order is not shipped via counter pickup".to_string(),
            ));
        }

        let receipt = self
            .logistics
            .create_shipment(&order)
            .await
            .map_err(|e| OrderError::LogisticsFailed(e.to_string()))?;

        self.with_order_lock(order_no, || {
            let txn = self.storage.begin_write()?;
            let mut order = self
                .storage
                .get_order_txn(&txn, order_no)?
                .ok_or_else(|| OrderError::OrderNotFound(order_no.to_string()))?;
            // The lock was not held across the remote call; the order
            // may have moved on while the provider was working.
            if order.status != OrderStatus::Paid {
                tracing::warn!(
                    order_no,
                    status = ?order.status,
                    logistics_id = %receipt.logistics_id,
                    "Order moved on during logistics creation; discarding receipt"
                );
                return Err(OrderError::StateConflict {
                    from: order.status,
                    trigger: "recreate_logistics",
                });
            }
            order.logistics_id = Some(receipt.logistics_id.clone());
            self.storage.put_order(&txn, &order)?;
            txn.commit().map_err(StorageError::from)?;

            tracing::info!(order_no, logistics_id = %receipt.logistics_id, "Logistics recreated");
            Ok(receipt.logistics_id.clone())
        })
    }

    // ========== Gift Stock ==========

    /// Non-fatal gift-stock adjustment at shipment time. Failures are
    /// logged and never fail the shipment.
    fn decrement_gift_stock_best_effort(&self, order: &Order) {
        for item in &order.items {
            match self.storage.decrement_gift_stock(&item.sku_id, item.quantity) {
                Ok((before, after)) => {
                    if before < u64::from(item.quantity) {
                        tracing::warn!(
                            order_no = %order.order_no,
                            sku_id = %item.sku_id,
                            before,
                            "Gift stock clamped at zero"
                        );
                    } else {
                        tracing::debug!(
                            order_no = %order.order_no,
                            sku_id = %item.sku_id,
                            after,
                            "Gift stock decremented"
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        order_no = %order.order_no,
                        sku_id = %item.sku_id,
                        error = %e,
                        "Gift stock decrement failed"
                    );
                }
            }
        }
    }
}
