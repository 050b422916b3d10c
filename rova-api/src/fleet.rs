use axum::{extract::State, routing::get, Json, Router};
use rova_core::Car;

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/cars", get(list_cars))
}

/// GET /v1/cars
async fn list_cars(State(state): State<AppState>) -> Result<Json<Vec<Car>>, AppError> {
    let cars = state.cars.list_cars().await?;
    Ok(Json(cars))
}
