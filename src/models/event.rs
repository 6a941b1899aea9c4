use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::attempt::AttemptOutcome;
use crate::models::driver::GeoPoint;
use crate::models::order::{OrderStatus, PaymentMethod};

/// What a driver's device receives when an order is offered to them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferSummary {
    pub order_id: Uuid,
    pub driver_id: Uuid,
    pub attempt_number: u32,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub payment_method: PaymentMethod,
    pub distance_km: f64,
    pub expires_at: DateTime<Utc>,
}

/// Transition feed for dispatcher consoles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchEvent {
    Offered {
        order_id: Uuid,
        driver_id: Uuid,
        attempt_number: u32,
        score: f64,
        at: DateTime<Utc>,
    },
    Accepted {
        order_id: Uuid,
        driver_id: Uuid,
        attempt_number: u32,
        at: DateTime<Utc>,
    },
    Released {
        order_id: Uuid,
        driver_id: Uuid,
        outcome: AttemptOutcome,
        at: DateTime<Utc>,
    },
    Failed {
        order_id: Uuid,
        reason: String,
        at: DateTime<Utc>,
    },
    StatusChanged {
        order_id: Uuid,
        status: OrderStatus,
        at: DateTime<Utc>,
    },
}
