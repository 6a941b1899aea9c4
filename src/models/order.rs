use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::attempt::DispatchAttempt;
use crate::models::driver::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Cash,
    Card,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Searching,
    Assigned,
    Accepted,
    PickedUp,
    InTransit,
    Delivered,
    Completed,
    Failed,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Failed | OrderStatus::Cancelled
        )
    }

    /// Statuses in which exactly one driver is attached to the order.
    pub fn holds_assignment(&self) -> bool {
        matches!(
            self,
            OrderStatus::Assigned
                | OrderStatus::Accepted
                | OrderStatus::PickedUp
                | OrderStatus::InTransit
                | OrderStatus::Delivered
        )
    }

    /// A driver has accepted the order and has not finished it yet.
    pub fn counts_against_load(&self) -> bool {
        matches!(
            self,
            OrderStatus::Accepted
                | OrderStatus::PickedUp
                | OrderStatus::InTransit
                | OrderStatus::Delivered
        )
    }

    /// Position along the happy path. Alternate exits have no rank.
    pub fn progress_rank(&self) -> Option<u8> {
        match self {
            OrderStatus::Searching => Some(0),
            OrderStatus::Assigned => Some(1),
            OrderStatus::Accepted => Some(2),
            OrderStatus::PickedUp => Some(3),
            OrderStatus::InTransit => Some(4),
            OrderStatus::Delivered => Some(5),
            OrderStatus::Completed => Some(6),
            OrderStatus::Failed | OrderStatus::Cancelled => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Searching => "SEARCHING",
            OrderStatus::Assigned => "ASSIGNED",
            OrderStatus::Accepted => "ACCEPTED",
            OrderStatus::PickedUp => "PICKED_UP",
            OrderStatus::InTransit => "IN_TRANSIT",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Failed => "FAILED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub payment_method: PaymentMethod,
    pub status: OrderStatus,
    pub assigned_driver_id: Option<Uuid>,
    pub attempt_count: u32,
    pub exclusion_list: Vec<Uuid>,
    pub attempts: Vec<DispatchAttempt>,
    pub failure_reason: Option<String>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub last_transition_at: DateTime<Utc>,
}

impl Order {
    pub fn new(
        pickup: GeoPoint,
        dropoff: GeoPoint,
        payment_method: PaymentMethod,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            pickup,
            dropoff,
            payment_method,
            status: OrderStatus::Searching,
            assigned_driver_id: None,
            attempt_count: 0,
            exclusion_list: Vec::new(),
            attempts: Vec::new(),
            failure_reason: None,
            version: 0,
            created_at: now,
            last_transition_at: now,
        }
    }

    pub fn is_excluded(&self, driver_id: &Uuid) -> bool {
        self.exclusion_list.contains(driver_id)
    }

    pub fn current_attempt(&self) -> Option<&DispatchAttempt> {
        self.attempts
            .iter()
            .rev()
            .find(|attempt| attempt.attempt_number == self.attempt_count)
    }

    /// The open offer, if the order is currently waiting on a driver.
    pub fn pending_attempt(&self) -> Option<&DispatchAttempt> {
        if self.status != OrderStatus::Assigned {
            return None;
        }
        self.current_attempt().filter(|attempt| attempt.is_pending())
    }

    pub fn is_offered_to(&self, driver_id: Uuid) -> bool {
        self.status == OrderStatus::Assigned && self.assigned_driver_id == Some(driver_id)
    }

    pub fn assignment_consistent(&self) -> bool {
        self.assigned_driver_id.is_some() == self.status.holds_assignment()
    }
}

/// Merge-style update applied by an `OrderStore`. Absent fields are left as-is.
#[derive(Debug, Clone, Default)]
pub struct OrderPatch {
    pub status: Option<OrderStatus>,
    pub assigned_driver_id: Option<Option<Uuid>>,
    pub attempt_count: Option<u32>,
    pub exclude_driver: Option<Uuid>,
    pub attempt: Option<DispatchAttempt>,
    pub failure_reason: Option<String>,
}

impl OrderPatch {
    pub fn offer(attempt: DispatchAttempt) -> Self {
        Self {
            status: Some(OrderStatus::Assigned),
            assigned_driver_id: Some(Some(attempt.driver_id)),
            attempt_count: Some(attempt.attempt_number),
            attempt: Some(attempt),
            ..Self::default()
        }
    }

    pub fn accepted(attempt: DispatchAttempt) -> Self {
        Self {
            status: Some(OrderStatus::Accepted),
            attempt: Some(attempt),
            ..Self::default()
        }
    }

    /// Hands the order back to search, excluding the driver that let it go.
    pub fn released(driver_id: Uuid, attempt: Option<DispatchAttempt>) -> Self {
        Self {
            status: Some(OrderStatus::Searching),
            assigned_driver_id: Some(None),
            exclude_driver: Some(driver_id),
            attempt,
            ..Self::default()
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: Some(OrderStatus::Failed),
            assigned_driver_id: Some(None),
            failure_reason: Some(reason.into()),
            ..Self::default()
        }
    }

    /// `attempt` closes the offer that was open when the order was cancelled.
    pub fn cancelled(reason: impl Into<String>, attempt: Option<DispatchAttempt>) -> Self {
        Self {
            status: Some(OrderStatus::Cancelled),
            assigned_driver_id: Some(None),
            failure_reason: Some(reason.into()),
            attempt,
            ..Self::default()
        }
    }

    pub fn progressed(status: OrderStatus) -> Self {
        let mut patch = Self {
            status: Some(status),
            ..Self::default()
        };
        if status == OrderStatus::Completed {
            patch.assigned_driver_id = Some(None);
        }
        patch
    }

    pub fn apply(&self, order: &mut Order, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            if status != order.status {
                order.last_transition_at = now;
            }
            order.status = status;
        }

        if let Some(assigned) = self.assigned_driver_id {
            order.assigned_driver_id = assigned;
        }

        if let Some(count) = self.attempt_count {
            order.attempt_count = order.attempt_count.max(count);
        }

        if let Some(driver_id) = self.exclude_driver {
            if !order.exclusion_list.contains(&driver_id) {
                order.exclusion_list.push(driver_id);
            }
        }

        if let Some(attempt) = &self.attempt {
            match order
                .attempts
                .iter_mut()
                .find(|existing| existing.attempt_number == attempt.attempt_number)
            {
                Some(existing) if existing.is_pending() => *existing = attempt.clone(),
                Some(_) => {}
                None => order.attempts.push(attempt.clone()),
            }
        }

        if let Some(reason) = &self.failure_reason {
            order.failure_reason = Some(reason.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::{Order, OrderPatch, OrderStatus, PaymentMethod};
    use crate::models::attempt::{AttemptOutcome, DispatchAttempt};
    use crate::models::driver::GeoPoint;

    fn order() -> Order {
        Order::new(
            GeoPoint {
                lat: 52.51,
                lng: 13.39,
            },
            GeoPoint {
                lat: 52.54,
                lng: 13.42,
            },
            PaymentMethod::Card,
            Utc::now(),
        )
    }

    #[test]
    fn offer_then_release_keeps_assignment_consistent() {
        let mut order = order();
        let driver = Uuid::from_u128(7);
        let now = Utc::now();

        let attempt = DispatchAttempt::pending(order.id, driver, 1, 0.8, now);
        OrderPatch::offer(attempt.clone()).apply(&mut order, now);

        assert_eq!(order.status, OrderStatus::Assigned);
        assert_eq!(order.assigned_driver_id, Some(driver));
        assert_eq!(order.attempt_count, 1);
        assert!(order.assignment_consistent());
        assert!(order.pending_attempt().is_some());

        let timed_out = attempt.resolve(AttemptOutcome::TimedOut, now);
        OrderPatch::released(driver, timed_out).apply(&mut order, now);

        assert_eq!(order.status, OrderStatus::Searching);
        assert_eq!(order.assigned_driver_id, None);
        assert!(order.is_excluded(&driver));
        assert_eq!(order.attempts[0].outcome, AttemptOutcome::TimedOut);
        assert!(order.assignment_consistent());
    }

    #[test]
    fn resolved_attempt_is_not_overwritten() {
        let mut order = order();
        let driver = Uuid::from_u128(7);
        let now = Utc::now();

        let attempt = DispatchAttempt::pending(order.id, driver, 1, 0.8, now);
        OrderPatch::offer(attempt.clone()).apply(&mut order, now);
        OrderPatch::accepted(attempt.resolve(AttemptOutcome::Accepted, now).unwrap())
            .apply(&mut order, now);

        let mut late = attempt.clone();
        late.outcome = AttemptOutcome::TimedOut;
        OrderPatch {
            attempt: Some(late),
            ..OrderPatch::default()
        }
        .apply(&mut order, now);

        assert_eq!(order.attempts.len(), 1);
        assert_eq!(order.attempts[0].outcome, AttemptOutcome::Accepted);
    }

    #[test]
    fn attempt_count_never_decreases() {
        let mut order = order();
        order.attempt_count = 2;

        OrderPatch {
            attempt_count: Some(1),
            ..OrderPatch::default()
        }
        .apply(&mut order, Utc::now());

        assert_eq!(order.attempt_count, 2);
    }

    #[test]
    fn exclusion_list_has_no_duplicates() {
        let mut order = order();
        let driver = Uuid::from_u128(3);

        OrderPatch::released(driver, None).apply(&mut order, Utc::now());
        OrderPatch::released(driver, None).apply(&mut order, Utc::now());

        assert_eq!(order.exclusion_list, vec![driver]);
    }
}
