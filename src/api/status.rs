use crate::api::{AppError, AppState};
use crate::broadcast::ConnectionSnapshot;
use crate::status::VehicleStatus;
use axum::{
    extract::{Path, State},
    response::Json,
    routing::get,
    Router,
};
use std::sync::Arc;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/vehicles", get(list_vehicles))
        .route("/api/vehicles/:vehicle_id", get(get_vehicle))
        .route("/api/connections", get(get_connections))
        .with_state(state)
}

/// GET /api/vehicles - Last known status of every tracked vehicle
async fn list_vehicles(State(state): State<Arc<AppState>>) -> Json<Vec<VehicleStatus>> {
    Json(state.status_cache.all())
}

/// GET /api/vehicles/{vehicleId} - Status of a single vehicle
async fn get_vehicle(
    State(state): State<Arc<AppState>>,
    Path(vehicle_id): Path<String>,
) -> Result<Json<VehicleStatus>, AppError> {
    state
        .status_cache
        .get(&vehicle_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("No status for vehicle '{}'", vehicle_id)))
}

/// GET /api/connections - Live stream subscriber counts and drop totals
async fn get_connections(State(state): State<Arc<AppState>>) -> Json<ConnectionSnapshot> {
    Json(state.broadcaster.snapshot())
}
