//! Deferred effects worker
//!
//! Consumes after-commit events and applies the side effects that must
//! not run inside the payment transaction: sales counters and
//! logistics-record creation. Every failure here is logged and
//! swallowed; a committed payment is never rolled back because a
//! follow-up effect misbehaved. A failed logistics creation is
//! recovered manually through `OrderManager::recreate_logistics`.

use crate::gateway::LogisticsGateway;
use crate::orders::storage::{OrderStorage, StorageError};
use shared::order::{Order, OrderEvent, OrderEventType};
use std::sync::Arc;
use tokio::sync::broadcast;

/// After-commit consumer for payment side effects.
pub struct DeferredEffectsWorker {
    storage: OrderStorage,
    logistics: Arc<dyn LogisticsGateway>,
}

impl DeferredEffectsWorker {
    pub fn new(storage: OrderStorage, logistics: Arc<dyn LogisticsGateway>) -> Self {
        Self { storage, logistics }
    }

    /// Run the consume loop until the event channel closes.
    pub async fn run(self, mut rx: broadcast::Receiver<OrderEvent>) {
        tracing::info!("Deferred effects worker started");
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if event.event_type == OrderEventType::PaymentConfirmed {
                        self.process(&event.order_no).await;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Deferred effects worker lagged behind the channel");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event channel closed, deferred effects worker stopping");
                    break;
                }
            }
        }
    }

    /// Apply all deferred effects for one confirmed payment.
    async fn process(&self, order_no: &str) {
        let order = match self.storage.get_order(order_no) {
            Ok(Some(order)) => order,
            Ok(None) => {
                tracing::warn!(order_no, "Payment event for missing order");
                return;
            }
            Err(e) => {
                tracing::error!(order_no, error = %e, "Failed to load order for deferred effects");
                return;
            }
        };

        if let Err(e) = self.record_sales(&order) {
            tracing::error!(order_no, error = %e, "Failed to record sales counters");
        }

        if order.shipping_method.is_counter_pickup() {
            self.create_logistics(&order).await;
        }
    }

    /// Bump the per-SKU sales counters in one transaction.
    fn record_sales(&self, order: &Order) -> Result<(), StorageError> {
        let txn = self.storage.begin_write()?;
        for item in &order.items {
            let total = self
                .storage
                .add_sales_count_txn(&txn, &item.sku_id, item.quantity)?;
            tracing::debug!(
                order_no = %order.order_no,
                sku_id = %item.sku_id,
                total,
                "Sales counter updated"
            );
        }
        txn.commit()?;
        Ok(())
    }

    /// Create the logistics record for a counter-pickup order and
    /// persist the provider id. Best-effort: a gateway failure leaves
    /// the order PAID without a logistics id.
    async fn create_logistics(&self, order: &Order) {
        if order.logistics_id.is_some() {
            tracing::debug!(order_no = %order.order_no, "Logistics record already exists");
            return;
        }

        let receipt = match self.logistics.create_shipment(order).await {
            Ok(receipt) => receipt,
            Err(e) => {
                tracing::error!(
                    order_no = %order.order_no,
                    error = %e,
                    "Deferred logistics creation failed; awaiting manual recreation"
                );
                return;
            }
        };

        if let Err(e) = self.persist_logistics_id(&order.order_no, &receipt.logistics_id) {
            tracing::error!(
                order_no = %order.order_no,
                logistics_id = %receipt.logistics_id,
                error = %e,
                "Failed to persist logistics id"
            );
            return;
        }
        tracing::info!(
            order_no = %order.order_no,
            logistics_id = %receipt.logistics_id,
            "Logistics record created"
        );
    }

    fn persist_logistics_id(&self, order_no: &str, logistics_id: &str) -> Result<(), StorageError> {
        let txn = self.storage.begin_write()?;
        let Some(mut order) = self.storage.get_order_txn(&txn, order_no)? else {
            tracing::warn!(order_no, "Order vanished before logistics id was persisted");
            return Ok(());
        };
        order.logistics_id = Some(logistics_id.to_string());
        self.storage.put_order(&txn, &order)?;
        txn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{InMemoryStockLedger, MockLogisticsGateway};
    use crate::orders::manager::OrderManager;
    use crate::orders::storage::SkuStock;
    use rust_decimal::Decimal;
    use shared::order::{
        CreateOrderInput, OrderLineInput, OrderStatus, PaymentCallbackResult, PaymentMethod,
        ReceiverInfo, ShippingMethod,
    };
    use std::time::Duration;

    fn setup(
        shipping: ShippingMethod,
    ) -> (OrderManager, DeferredEffectsWorker, Arc<MockLogisticsGateway>, Order) {
        let storage = OrderStorage::open_in_memory().unwrap();
        let ledger = Arc::new(InMemoryStockLedger::new());
        let logistics = Arc::new(MockLogisticsGateway::new());
        let manager = OrderManager::new(storage.clone(), ledger, logistics.clone());
        let worker = DeferredEffectsWorker::new(storage.clone(), logistics.clone());

        storage
            .insert_sku(&SkuStock {
                sku_id: "sku-1".to_string(),
                product_id: "prod-1".to_string(),
                name: "Widget".to_string(),
                price: Decimal::from(100),
                quantity: 10,
                ledger_item_id: None,
            })
            .unwrap();

        let order = manager
            .create_order(CreateOrderInput {
                member_id: "m-1".to_string(),
                receiver: ReceiverInfo {
                    name: "Ada".to_string(),
                    phone: "555-0100".to_string(),
                    address: "1 Engine Way".to_string(),
                },
                payment_method: PaymentMethod::Gateway,
                shipping_method: shipping,
                lines: vec![OrderLineInput {
                    sku_id: "sku-1".to_string(),
                    quantity: 3,
                    expected_price: Decimal::from(100),
                }],
            })
            .unwrap();
        (manager, worker, logistics, order)
    }

    fn callback(order_no: &str) -> PaymentCallbackResult {
        PaymentCallbackResult {
            order_no: order_no.to_string(),
            trade_no: "T-1".to_string(),
            success: true,
            raw_payload: "{}".to_string(),
            ack_body: "success".to_string(),
        }
    }

    #[tokio::test]
    async fn records_sales_for_paid_courier_order() {
        let (manager, worker, logistics, order) = setup(ShippingMethod::Courier);
        manager.handle_payment_callback(&callback(&order.order_no));

        worker.process(&order.order_no).await;

        assert_eq!(worker.storage.sales_count("sku-1").unwrap(), 3);
        // Courier orders never touch the logistics provider
        assert_eq!(logistics.created(), 0);
    }

    #[tokio::test]
    async fn creates_logistics_for_counter_pickup() {
        let (manager, worker, logistics, order) = setup(ShippingMethod::CounterPickup);
        manager.handle_payment_callback(&callback(&order.order_no));

        worker.process(&order.order_no).await;

        assert_eq!(logistics.created(), 1);
        let after = manager.get_order(&order.order_no).unwrap().unwrap();
        assert_eq!(after.logistics_id.as_deref(), Some("LG-1"));
    }

    #[tokio::test]
    async fn existing_logistics_id_is_not_recreated() {
        let (manager, worker, logistics, order) = setup(ShippingMethod::CounterPickup);
        manager.handle_payment_callback(&callback(&order.order_no));

        worker.process(&order.order_no).await;
        worker.process(&order.order_no).await;

        assert_eq!(logistics.created(), 1);
        let after = manager.get_order(&order.order_no).unwrap().unwrap();
        assert_eq!(after.logistics_id.as_deref(), Some("LG-1"));
        // Sales counters are only idempotent per event, not per call;
        // the run loop delivers one PaymentConfirmed per order
        assert_eq!(worker.storage.sales_count("sku-1").unwrap(), 6);
    }

    #[tokio::test]
    async fn gateway_failure_leaves_payment_committed() {
        let (manager, worker, logistics, order) = setup(ShippingMethod::CounterPickup);
        manager.handle_payment_callback(&callback(&order.order_no));

        logistics.set_failing(true);
        worker.process(&order.order_no).await;

        // Payment stays committed, only the logistics record is missing
        let after = manager.get_order(&order.order_no).unwrap().unwrap();
        assert_eq!(after.status, OrderStatus::Paid);
        assert!(after.logistics_id.is_none());
        assert_eq!(worker.storage.sales_count("sku-1").unwrap(), 3);

        // Manual recovery once the provider is healthy again
        logistics.set_failing(false);
        let id = manager.recreate_logistics(&order.order_no).await.unwrap();
        let healed = manager.get_order(&order.order_no).unwrap().unwrap();
        assert_eq!(healed.logistics_id.as_deref(), Some(id.as_str()));
    }

    #[tokio::test]
    async fn missing_order_is_ignored() {
        let (_, worker, logistics, _) = setup(ShippingMethod::Courier);
        worker.process("S000000000000XXXXXXX").await;
        assert_eq!(logistics.created(), 0);
    }

    #[tokio::test]
    async fn run_loop_consumes_payment_events() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let (manager, worker, _, order) = setup(ShippingMethod::Courier);
        let rx = manager.subscribe();
        let handle = tokio::spawn(worker.run(rx));

        manager.handle_payment_callback(&callback(&order.order_no));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if manager.storage().sales_count("sku-1").unwrap() == 3 {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "worker never processed the event");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // Dropping the manager closes the channel and stops the worker
        drop(manager);
        handle.await.unwrap();
    }
}
