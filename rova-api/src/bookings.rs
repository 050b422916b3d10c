use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rova_core::Reservation;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub car_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub customer_email: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/bookings", post(create_booking))
        .route("/v1/bookings/{id}", get(get_booking))
        .route("/v1/bookings/{id}/cancel", post(cancel_booking))
        .route("/v1/bookings/{id}/return", post(return_booking))
}

/// POST /v1/bookings
/// Reserve a car for a half-open window; price is derived server-side
async fn create_booking(
    State(state): State<AppState>,
    Json(req): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<Reservation>), AppError> {
    let reservation = state
        .guard
        .reserve(req.car_id, req.start_time, req.end_time, req.customer_email)
        .await?;
    Ok((StatusCode::CREATED, Json(reservation)))
}

/// GET /v1/bookings/{id}
async fn get_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Reservation>, AppError> {
    let reservation = state.guard.get(id).await?;
    Ok(Json(reservation))
}

/// POST /v1/bookings/{id}/cancel
/// Free the reservation's window; idempotent for already-cancelled ones
async fn cancel_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Reservation>, AppError> {
    let reservation = state.guard.cancel(id).await?;
    Ok(Json(reservation))
}

/// POST /v1/bookings/{id}/return
/// Close out a finished rental
async fn return_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Reservation>, AppError> {
    let reservation = state.guard.mark_returned(id).await?;
    Ok(Json(reservation))
}
