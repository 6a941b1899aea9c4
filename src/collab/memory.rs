use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::collab::{DriverDirectory, OrderFilter, OrderStore};
use crate::error::{CollaboratorError, StoreError};
use crate::models::driver::{Driver, DriverStatus, GeoPoint};
use crate::models::order::{Order, OrderPatch};

pub struct InMemoryOrderStore {
    orders: DashMap<Uuid, Order>,
    changes_tx: broadcast::Sender<Order>,
}

impl InMemoryOrderStore {
    pub fn new(change_buffer_size: usize) -> Self {
        let (changes_tx, _unused_rx) = broadcast::channel(change_buffer_size);
        Self {
            orders: DashMap::new(),
            changes_tx,
        }
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

impl Default for InMemoryOrderStore {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn get(&self, order_id: Uuid) -> Result<Order, StoreError> {
        self.orders
            .get(&order_id)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::NotFound(order_id))
    }

    async fn insert(&self, order: Order) -> Result<Order, StoreError> {
        self.orders.insert(order.id, order.clone());
        let _ = self.changes_tx.send(order.clone());
        Ok(order)
    }

    async fn update(
        &self,
        order_id: Uuid,
        patch: OrderPatch,
        expected_version: Option<u64>,
    ) -> Result<Order, StoreError> {
        let updated = {
            let mut entry = self
                .orders
                .get_mut(&order_id)
                .ok_or(StoreError::NotFound(order_id))?;

            if let Some(expected) = expected_version {
                if entry.version != expected {
                    return Err(StoreError::Conflict {
                        order_id,
                        expected,
                        actual: entry.version,
                    });
                }
            }

            patch.apply(&mut entry, Utc::now());
            entry.version += 1;
            entry.clone()
        };

        let _ = self.changes_tx.send(updated.clone());
        Ok(updated)
    }

    async fn query(&self, filter: OrderFilter) -> Result<Vec<Order>, StoreError> {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        orders.sort_by_key(|order| order.created_at);
        Ok(orders)
    }

    async fn subscribe(
        &self,
        filter: OrderFilter,
    ) -> Result<BoxStream<'static, Order>, StoreError> {
        // Subscribe before the snapshot so no change falls between the two.
        let live = BroadcastStream::new(self.changes_tx.subscribe()).filter_map(move |change| {
            let matched = change.ok().filter(|order| filter.matches(order));
            async move { matched }
        });
        let snapshot = self.query(filter).await?;

        Ok(stream::iter(snapshot).chain(live).boxed())
    }
}

#[derive(Default)]
pub struct InMemoryDriverDirectory {
    drivers: DashMap<Uuid, Driver>,
}

impl InMemoryDriverDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, driver: Driver) {
        self.drivers.insert(driver.id, driver);
    }

    pub fn all(&self) -> Vec<Driver> {
        let mut drivers: Vec<Driver> = self
            .drivers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        drivers.sort_by_key(|driver| driver.id);
        drivers
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    pub fn set_status(&self, driver_id: Uuid, status: DriverStatus) -> Option<Driver> {
        let mut driver = self.drivers.get_mut(&driver_id)?;
        driver.status = status;
        driver.online = status != DriverStatus::Offline;
        driver.updated_at = Utc::now();
        Some(driver.clone())
    }

    pub fn set_location(&self, driver_id: Uuid, location: GeoPoint) -> Option<Driver> {
        let mut driver = self.drivers.get_mut(&driver_id)?;
        driver.location = location;
        driver.updated_at = Utc::now();
        Some(driver.clone())
    }
}

#[async_trait]
impl DriverDirectory for InMemoryDriverDirectory {
    async fn list_online_drivers(&self) -> Result<Vec<Driver>, CollaboratorError> {
        Ok(self.all().into_iter().filter(|driver| driver.online).collect())
    }

    async fn get_driver(&self, driver_id: Uuid) -> Result<Driver, CollaboratorError> {
        self.drivers
            .get(&driver_id)
            .map(|entry| entry.value().clone())
            .ok_or(CollaboratorError::DriverNotFound(driver_id))
    }

    async fn record_offer_outcome(
        &self,
        driver_id: Uuid,
        _order_id: Uuid,
        accepted: bool,
    ) -> Result<(), CollaboratorError> {
        let mut driver = self
            .drivers
            .get_mut(&driver_id)
            .ok_or(CollaboratorError::DriverNotFound(driver_id))?;

        if accepted {
            driver.active_orders = driver.active_orders.saturating_add(1);
        }
        driver.updated_at = Utc::now();
        Ok(())
    }

    async fn release_order(
        &self,
        driver_id: Uuid,
        _order_id: Uuid,
    ) -> Result<(), CollaboratorError> {
        let mut driver = self
            .drivers
            .get_mut(&driver_id)
            .ok_or(CollaboratorError::DriverNotFound(driver_id))?;

        driver.active_orders = driver.active_orders.saturating_sub(1);
        driver.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use futures::StreamExt;

    use super::{InMemoryDriverDirectory, InMemoryOrderStore};
    use crate::collab::{DriverDirectory, OrderFilter, OrderStore};
    use crate::error::{CollaboratorError, StoreError};
    use crate::models::driver::{Compliance, Driver, DriverStatus, GeoPoint};
    use crate::models::order::{Order, OrderPatch, OrderStatus, PaymentMethod};

    fn order() -> Order {
        let point = GeoPoint {
            lat: 52.5,
            lng: 13.4,
        };
        Order::new(point, point, PaymentMethod::Card, Utc::now())
    }

    #[tokio::test]
    async fn stale_version_is_a_conflict() {
        let store = InMemoryOrderStore::default();
        let order = store.insert(order()).await.unwrap();

        let updated = store
            .update(order.id, OrderPatch::cancelled("test", None), Some(0))
            .await
            .unwrap();
        assert_eq!(updated.version, 1);

        let err = store
            .update(order.id, OrderPatch::cancelled("again", None), Some(0))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::Conflict {
                order_id: order.id,
                expected: 0,
                actual: 1
            }
        );
    }

    #[tokio::test]
    async fn unknown_order_is_not_found() {
        let store = InMemoryOrderStore::default();
        let missing = uuid::Uuid::new_v4();
        assert_eq!(
            store.get(missing).await.unwrap_err(),
            StoreError::NotFound(missing)
        );
    }

    #[tokio::test]
    async fn subscribe_yields_snapshot_then_matching_changes() {
        let store = InMemoryOrderStore::default();
        let first = store.insert(order()).await.unwrap();

        let mut stream = store
            .subscribe(OrderFilter::status(OrderStatus::Cancelled))
            .await
            .unwrap();

        store
            .update(first.id, OrderPatch::cancelled("gone", None), None)
            .await
            .unwrap();

        let next = stream.next().await.unwrap();
        assert_eq!(next.id, first.id);
        assert_eq!(next.status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn accepted_orders_count_up_and_releases_count_down() {
        let directory = InMemoryDriverDirectory::new();
        let driver_id = uuid::Uuid::from_u128(9);
        let order_id = uuid::Uuid::from_u128(10);
        directory.upsert(Driver {
            id: driver_id,
            name: "courier".to_string(),
            online: true,
            status: DriverStatus::Available,
            location: GeoPoint {
                lat: 52.5,
                lng: 13.4,
            },
            active_orders: 0,
            compliance: Compliance {
                registration_approved: true,
                documents_approved: true,
                training_expires_at: None,
            },
            outstanding_debt: 0.0,
            debt_ceiling: None,
            rating: 4.0,
            updated_at: Utc::now(),
        });

        directory
            .record_offer_outcome(driver_id, order_id, false)
            .await
            .unwrap();
        assert_eq!(directory.get_driver(driver_id).await.unwrap().active_orders, 0);

        directory
            .record_offer_outcome(driver_id, order_id, true)
            .await
            .unwrap();
        directory.release_order(driver_id, order_id).await.unwrap();
        // A duplicate release never wraps below zero.
        directory.release_order(driver_id, order_id).await.unwrap();
        assert_eq!(directory.get_driver(driver_id).await.unwrap().active_orders, 0);

        let missing = uuid::Uuid::from_u128(11);
        assert_eq!(
            directory.release_order(missing, order_id).await.unwrap_err(),
            CollaboratorError::DriverNotFound(missing)
        );
    }
}
