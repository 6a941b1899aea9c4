use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// One async mutex per order. Every mutation of an order happens under its
/// guard; different orders never contend. An entry lives only while some
/// task holds or waits for that order's lock.
#[derive(Default)]
pub struct OrderLocks {
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl OrderLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, order_id: Uuid) -> OrderGuard {
        let lock = self.locks.entry(order_id).or_default().clone();
        let guard = lock.lock_owned().await;
        OrderGuard {
            guard: Some(guard),
            locks: self.locks.clone(),
            order_id,
        }
    }

    /// Orders with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Holds one order's lock. Dropping it releases the lock and removes the
/// map entry when no other task holds a handle to the same mutex.
pub struct OrderGuard {
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
    order_id: Uuid,
}

impl Drop for OrderGuard {
    fn drop(&mut self) {
        // The guard owns a handle too; release it before counting.
        drop(self.guard.take());
        self.locks
            .remove_if(&self.order_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Per-order `reassignment_in_progress` flags.
#[derive(Clone, Default)]
pub struct ReassignmentFlags {
    in_progress: Arc<DashSet<Uuid>>,
}

impl ReassignmentFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag, or returns `None` if another trigger already holds it.
    pub fn try_begin(&self, order_id: Uuid) -> Option<ReassignmentGuard> {
        if self.in_progress.insert(order_id) {
            Some(ReassignmentGuard {
                flags: self.in_progress.clone(),
                order_id,
            })
        } else {
            None
        }
    }

    pub fn is_in_progress(&self, order_id: Uuid) -> bool {
        self.in_progress.contains(&order_id)
    }
}

/// Lowers the flag on drop.
pub struct ReassignmentGuard {
    flags: Arc<DashSet<Uuid>>,
    order_id: Uuid,
}

impl Drop for ReassignmentGuard {
    fn drop(&mut self) {
        self.flags.remove(&self.order_id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use uuid::Uuid;

    use super::{OrderLocks, ReassignmentFlags};

    #[test]
    fn second_trigger_sees_the_flag() {
        let flags = ReassignmentFlags::new();
        let order_id = Uuid::new_v4();

        let guard = flags.try_begin(order_id);
        assert!(guard.is_some());
        assert!(flags.try_begin(order_id).is_none());
        assert!(flags.is_in_progress(order_id));

        drop(guard);
        assert!(!flags.is_in_progress(order_id));
        assert!(flags.try_begin(order_id).is_some());
    }

    #[test]
    fn flags_are_per_order() {
        let flags = ReassignmentFlags::new();
        let _a = flags.try_begin(Uuid::from_u128(1)).unwrap();
        assert!(flags.try_begin(Uuid::from_u128(2)).is_some());
    }

    #[tokio::test]
    async fn same_order_is_serialized() {
        let locks = Arc::new(OrderLocks::new());
        let order_id = Uuid::new_v4();

        let held = locks.lock(order_id).await;
        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(order_id).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(held);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn different_orders_do_not_block() {
        let locks = OrderLocks::new();
        let _a = locks.lock(Uuid::from_u128(1)).await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.lock(Uuid::from_u128(2)))
            .await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn released_locks_leave_no_entries() {
        let locks = OrderLocks::new();

        for n in 0..1_000u128 {
            let _guard = locks.lock(Uuid::from_u128(n)).await;
            assert_eq!(locks.len(), 1);
        }

        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn entry_survives_while_a_waiter_holds_it() {
        let locks = Arc::new(OrderLocks::new());
        let order_id = Uuid::new_v4();

        let held = locks.lock(order_id).await;
        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(order_id).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The waiter still points at this mutex, so the entry must stay.
        drop(held);
        assert_eq!(locks.len(), 1);

        waiter.await.unwrap();
        assert!(locks.is_empty());
    }
}
