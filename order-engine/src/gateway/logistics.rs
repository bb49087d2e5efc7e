//! Logistics provider interface
//!
//! Shipment creation is a remote call with no transactional
//! participation: it may fail independently of an already-committed
//! payment, and the failure is recovered later through the manual
//! `recreate_logistics` operation.

use async_trait::async_trait;
use shared::order::Order;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use thiserror::Error;

/// Gateway errors
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Error text from the provider, surfaced to operators verbatim
    #[error("logistics gateway error: {0}")]
    Remote(String),
}

/// Provider-issued shipment record.
#[derive(Debug, Clone)]
pub struct ShipmentReceipt {
    pub logistics_id: String,
}

/// Create a pickup/shipment record with the logistics provider.
#[async_trait]
pub trait LogisticsGateway: Send + Sync {
    async fn create_shipment(&self, order: &Order) -> Result<ShipmentReceipt, GatewayError>;
}

/// In-process gateway double with a failure toggle.
///
/// Issues sequential ids (`LG-1`, `LG-2`, ...) while healthy; when
/// failing, every call returns a `Remote` error, which is how tests
/// exercise the recovery path.
#[derive(Default)]
pub struct MockLogisticsGateway {
    counter: AtomicU64,
    failing: AtomicBool,
}

impl MockLogisticsGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle the simulated outage.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of successful shipment creations so far.
    pub fn created(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogisticsGateway for MockLogisticsGateway {
    async fn create_shipment(&self, order: &Order) -> Result<ShipmentReceipt, GatewayError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(GatewayError::Remote(format!(
                "provider rejected shipment for {}",
                order.order_no
            )));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ShipmentReceipt {
            logistics_id: format!("LG-{n}"),
        })
    }
}
