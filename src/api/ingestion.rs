use crate::api::{AppError, AppState};
use crate::event::LocationEvent;
use axum::{
    body::Bytes,
    extract::State,
    response::Json,
    routing::post,
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Success response for location ingestion
#[derive(Serialize)]
struct IngestResponse {
    #[serde(rename = "eventId")]
    event_id: String,
    #[serde(rename = "vehicleId")]
    vehicle_id: String,
}

/// Batch response
#[derive(Serialize)]
struct BatchResponse {
    processed: usize,
    total: usize,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/gps", post(ingest_location))
        .route("/api/gps/batch", post(ingest_batch))
        .with_state(state)
}

/// POST /api/gps - Publish single location event
async fn ingest_location(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<IngestResponse>, AppError> {
    let mut event: LocationEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    // Validate and prepare event (generates UUIDv7 if needed)
    event
        .validate_and_prepare()
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    info!(
        event_id = %event.event_id.as_deref().unwrap_or(""),
        vehicle_id = %event.vehicle_id,
        "Ingesting location event"
    );

    state.publisher.publish(&event).await.map_err(|e| {
        error!(error = %e, "Failed to publish location event to NATS");
        AppError::PublishError(e.to_string())
    })?;

    Ok(Json(IngestResponse {
        event_id: event.event_id.clone().unwrap_or_default(),
        vehicle_id: event.vehicle_id.clone(),
    }))
}

/// POST /api/gps/batch - Publish multiple location events
///
/// Invalid entries are skipped; the response reports how many of the
/// submitted events were accepted.
async fn ingest_batch(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<BatchResponse>, AppError> {
    let entries: Vec<serde_json::Value> = serde_json::from_slice(&body)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    let total = entries.len();
    if total == 0 {
        return Err(AppError::ValidationError(
            "Batch must contain at least one event".to_string(),
        ));
    }
    if total > state.max_batch_events {
        return Err(AppError::PayloadTooLarge);
    }

    info!(count = total, "Ingesting location batch");

    let mut processed = 0;
    for entry in entries {
        let mut event: LocationEvent = match serde_json::from_value(entry) {
            Ok(event) => event,
            Err(e) => {
                debug!(error = %e, "Skipping malformed batch entry");
                continue;
            }
        };

        if let Err(e) = event.validate_and_prepare() {
            debug!(error = %e, "Skipping invalid batch entry");
            continue;
        }

        match state.publisher.publish(&event).await {
            Ok(()) => processed += 1,
            Err(e) => {
                error!(error = %e, vehicle_id = %event.vehicle_id, "Failed to publish batch entry");
            }
        }
    }

    Ok(Json(BatchResponse { processed, total }))
}
