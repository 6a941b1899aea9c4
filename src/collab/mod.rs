//! Interfaces to the systems the engine depends on but does not own.
//!
//! Implementations are injected as `Arc<dyn _>`; the in-memory ones in
//! [`memory`] and [`notify`] back the binary and the tests.

pub mod memory;
pub mod notify;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{CollaboratorError, StoreError};
use crate::models::driver::{Driver, GeoPoint};
use crate::models::event::OfferSummary;
use crate::models::order::{Order, OrderPatch, OrderStatus};

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub driver_id: Option<Uuid>,
}

impl OrderFilter {
    pub fn status(status: OrderStatus) -> Self {
        Self {
            status: Some(status),
            driver_id: None,
        }
    }

    pub fn assigned_to(driver_id: Uuid) -> Self {
        Self {
            status: Some(OrderStatus::Assigned),
            driver_id: Some(driver_id),
        }
    }

    pub fn matches(&self, order: &Order) -> bool {
        self.status.is_none_or(|status| order.status == status)
            && self
                .driver_id
                .is_none_or(|driver| order.assigned_driver_id == Some(driver))
    }
}

/// Document store holding orders.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn get(&self, order_id: Uuid) -> Result<Order, StoreError>;

    /// Stores a freshly created order. Used by intake.
    async fn insert(&self, order: Order) -> Result<Order, StoreError>;

    /// Merges `patch` into the order. With `expected_version`, the write only
    /// applies if the stored version still matches.
    async fn update(
        &self,
        order_id: Uuid,
        patch: OrderPatch,
        expected_version: Option<u64>,
    ) -> Result<Order, StoreError>;

    /// Point-in-time snapshot of matching orders.
    async fn query(&self, filter: OrderFilter) -> Result<Vec<Order>, StoreError>;

    /// Current matching orders followed by every later change that matches.
    async fn subscribe(&self, filter: OrderFilter) -> Result<BoxStream<'static, Order>, StoreError>;
}

#[async_trait]
pub trait DriverDirectory: Send + Sync {
    async fn list_online_drivers(&self) -> Result<Vec<Driver>, CollaboratorError>;

    async fn get_driver(&self, driver_id: Uuid) -> Result<Driver, CollaboratorError>;

    /// Reflects the driver's answer to an offer.
    async fn record_offer_outcome(
        &self,
        driver_id: Uuid,
        order_id: Uuid,
        accepted: bool,
    ) -> Result<(), CollaboratorError>;

    /// The driver no longer carries an order they had accepted.
    async fn release_order(&self, driver_id: Uuid, order_id: Uuid) -> Result<(), CollaboratorError>;
}

/// Push channel to driver devices.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn offer(
        &self,
        driver_id: Uuid,
        order_id: Uuid,
        summary: &OfferSummary,
    ) -> Result<(), CollaboratorError>;
}

pub trait DistanceEstimator: Send + Sync {
    fn distance_km(&self, a: &GeoPoint, b: &GeoPoint) -> Result<f64, CollaboratorError>;
}
