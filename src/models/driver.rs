use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DriverStatus {
    Available,
    Busy,
    Offline,
}

/// Regulatory state a driver must satisfy before receiving any offer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Compliance {
    pub registration_approved: bool,
    pub documents_approved: bool,
    pub training_expires_at: Option<DateTime<Utc>>,
}

impl Compliance {
    pub fn cleared(&self, now: DateTime<Utc>) -> bool {
        self.registration_approved
            && self.documents_approved
            && self.training_expires_at.is_some_and(|expires| expires > now)
    }
}

/// Driver record as seen through the directory. The engine only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub id: Uuid,
    pub name: String,
    pub online: bool,
    pub status: DriverStatus,
    pub location: GeoPoint,
    pub active_orders: u32,
    pub compliance: Compliance,
    pub outstanding_debt: f64,
    /// Per-driver cash ceiling; `None` falls back to the configured default.
    pub debt_ceiling: Option<f64>,
    pub rating: f64,
    pub updated_at: DateTime<Utc>,
}

impl Driver {
    pub fn is_operational(&self) -> bool {
        self.online && self.status == DriverStatus::Available
    }
}
