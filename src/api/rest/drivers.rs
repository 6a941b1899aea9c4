use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::collab::DriverDirectory;
use crate::engine::supervisor::ReassignOutcome;
use crate::error::AppError;
use crate::models::driver::{Compliance, Driver, DriverStatus, GeoPoint};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", post(create_driver).get(list_drivers))
        .route("/drivers/:id", get(get_driver))
        .route("/drivers/:id/status", patch(update_driver_status))
        .route("/drivers/:id/location", patch(update_driver_location))
        .route("/drivers/:id/offline", post(driver_offline))
}

#[derive(Deserialize)]
pub struct CreateDriverRequest {
    pub name: String,
    pub location: GeoPoint,
    pub rating: f64,
    #[serde(default)]
    pub active_orders: u32,
    #[serde(default)]
    pub outstanding_debt: f64,
    pub debt_ceiling: Option<f64>,
    pub registration_approved: bool,
    pub documents_approved: bool,
    pub training_expires_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: DriverStatus,
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub location: GeoPoint,
}

#[derive(Serialize)]
pub struct ReassignedOrder {
    pub order_id: Uuid,
    pub outcome: ReassignOutcome,
}

#[derive(Serialize)]
pub struct OfflineResponse {
    pub driver: Driver,
    pub reassigned: Vec<ReassignedOrder>,
}

async fn create_driver(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateDriverRequest>,
) -> Result<Json<Driver>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }

    if !payload.outstanding_debt.is_finite() || payload.outstanding_debt < 0.0 {
        return Err(AppError::BadRequest(
            "outstanding_debt must be a non-negative number".to_string(),
        ));
    }

    let driver = Driver {
        id: Uuid::new_v4(),
        name: payload.name,
        online: true,
        status: DriverStatus::Available,
        location: payload.location,
        active_orders: payload.active_orders,
        compliance: Compliance {
            registration_approved: payload.registration_approved,
            documents_approved: payload.documents_approved,
            training_expires_at: payload.training_expires_at,
        },
        outstanding_debt: payload.outstanding_debt,
        debt_ceiling: payload.debt_ceiling,
        rating: payload.rating.clamp(0.0, 5.0),
        updated_at: Utc::now(),
    };

    state.drivers.upsert(driver.clone());
    Ok(Json(driver))
}

async fn list_drivers(State(state): State<Arc<AppState>>) -> Json<Vec<Driver>> {
    Json(state.drivers.all())
}

async fn get_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Driver>, AppError> {
    state
        .drivers
        .get_driver(id)
        .await
        .map(Json)
        .map_err(|_| AppError::NotFound(format!("driver {id} not found")))
}

async fn update_driver_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Driver>, AppError> {
    let driver = state
        .drivers
        .set_status(id, payload.status)
        .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))?;

    if payload.status == DriverStatus::Offline {
        state.engine.driver_went_offline(id).await?;
    }

    Ok(Json(driver))
}

async fn update_driver_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<Driver>, AppError> {
    let driver = state
        .drivers
        .set_location(id, payload.location)
        .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))?;

    Ok(Json(driver))
}

/// Driver session dropped: mark the driver offline and pull back their offers.
async fn driver_offline(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<OfflineResponse>, AppError> {
    let driver = state
        .drivers
        .set_status(id, DriverStatus::Offline)
        .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))?;

    let reassigned = state
        .engine
        .driver_went_offline(id)
        .await?
        .into_iter()
        .map(|(order_id, outcome)| ReassignedOrder { order_id, outcome })
        .collect();

    Ok(Json(OfflineResponse { driver, reassigned }))
}
