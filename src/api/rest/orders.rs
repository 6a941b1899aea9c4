use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::collab::OrderFilter;
use crate::engine::coordinator::{AcceptOutcome, DeclineOutcome, DispatchOutcome};
use crate::engine::supervisor::ReassignOutcome;
use crate::error::AppError;
use crate::models::attempt::DispatchAttempt;
use crate::models::candidate::CandidateSearch;
use crate::models::driver::GeoPoint;
use crate::models::order::{Order, OrderStatus, PaymentMethod};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order).get(list_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/attempts", get(list_attempts))
        .route("/orders/:id/candidates", get(preview_candidates))
        .route("/orders/:id/dispatch", post(dispatch_order))
        .route("/orders/:id/accept", post(accept_offer))
        .route("/orders/:id/decline", post(decline_offer))
        .route("/orders/:id/driver-cancel", post(cancel_by_driver))
        .route("/orders/:id/cancel", post(cancel_order))
        .route("/orders/:id/progress", post(record_progress))
}

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub payment_method: PaymentMethod,
}

#[derive(Deserialize)]
pub struct DriverActionRequest {
    pub driver_id: Uuid,
}

#[derive(Deserialize)]
pub struct DriverCancelRequest {
    pub driver_id: Uuid,
    #[serde(default)]
    pub reason: String,
}

#[derive(Deserialize)]
pub struct CancelRequest {
    pub reason: String,
}

#[derive(Deserialize)]
pub struct ProgressRequest {
    pub status: OrderStatus,
}

#[derive(Serialize)]
pub struct OrderWithDispatch {
    pub order: Order,
    pub dispatch: DispatchOutcome,
}

#[derive(Serialize)]
pub struct AcceptResponse {
    pub outcome: AcceptOutcome,
}

#[derive(Serialize)]
pub struct DeclineResponse {
    pub outcome: DeclineOutcome,
}

fn validate_point(name: &str, point: &GeoPoint) -> Result<(), AppError> {
    let valid = point.lat.is_finite()
        && point.lng.is_finite()
        && (-90.0..=90.0).contains(&point.lat)
        && (-180.0..=180.0).contains(&point.lng);

    if valid {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!("{name} is not a valid coordinate")))
    }
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<Json<OrderWithDispatch>, AppError> {
    validate_point("pickup", &payload.pickup)?;
    validate_point("dropoff", &payload.dropoff)?;

    let (order, dispatch) = state
        .engine
        .submit(payload.pickup, payload.dropoff, payload.payment_method)
        .await?;

    Ok(Json(OrderWithDispatch { order, dispatch }))
}

async fn list_orders(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<OrderFilter>,
) -> Result<Json<Vec<Order>>, AppError> {
    Ok(Json(state.engine.list_orders(filter).await?))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.engine.get_order(id).await?))
}

async fn list_attempts(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<DispatchAttempt>>, AppError> {
    let order = state.engine.get_order(id).await?;
    Ok(Json(order.attempts))
}

async fn preview_candidates(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<CandidateSearch>, AppError> {
    Ok(Json(state.engine.preview_candidates(id).await?))
}

async fn dispatch_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderWithDispatch>, AppError> {
    let dispatch = state.engine.dispatch(id).await?;
    let order = state.engine.get_order(id).await?;
    Ok(Json(OrderWithDispatch { order, dispatch }))
}

async fn accept_offer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> Result<Json<AcceptResponse>, AppError> {
    let outcome = state.engine.accept(id, payload.driver_id).await?;
    Ok(Json(AcceptResponse { outcome }))
}

async fn decline_offer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> Result<Json<DeclineResponse>, AppError> {
    let outcome = state.engine.decline(id, payload.driver_id).await?;
    Ok(Json(DeclineResponse { outcome }))
}

async fn cancel_by_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverCancelRequest>,
) -> Result<Json<ReassignOutcome>, AppError> {
    let outcome = state
        .engine
        .cancel_by_driver(id, payload.driver_id, &payload.reason)
        .await?;
    Ok(Json(outcome))
}

async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CancelRequest>,
) -> Result<Json<Order>, AppError> {
    if payload.reason.trim().is_empty() {
        return Err(AppError::BadRequest("reason cannot be empty".to_string()));
    }
    Ok(Json(state.engine.cancel_order(id, &payload.reason).await?))
}

async fn record_progress(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ProgressRequest>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.engine.record_progress(id, payload.status).await?))
}
