use crate::broadcast::LiveBroadcaster;
use crate::nats::LocationPublisher;
use crate::status::StatusCache;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

mod ingestion;
mod status;
mod stream;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub publisher: Arc<dyn LocationPublisher>,
    pub status_cache: Arc<StatusCache>,
    pub broadcaster: Arc<LiveBroadcaster>,
    /// Maximum entries accepted by the batch ingestion endpoint
    pub max_batch_events: usize,
    /// Cadence of SSE heartbeat events
    pub heartbeat: Duration,
    /// Reconnect hint attached to SSE data events
    pub retry: Duration,
}

/// Create the full API router: ingestion, vehicle status, live streams
pub fn create_router(state: AppState) -> Router {
    let shared = Arc::new(state);
    Router::new()
        .merge(ingestion::router(Arc::clone(&shared)))
        .merge(status::router(Arc::clone(&shared)))
        .merge(stream::router(shared))
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Application error types
enum AppError {
    ValidationError(String),
    NotFound(String),
    PublishError(String),
    PayloadTooLarge,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::PublishError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::PayloadTooLarge => {
                (StatusCode::PAYLOAD_TOO_LARGE, "payload too large".to_string())
            }
        };
        let body = Json(ErrorResponse {
            error: error_message,
        });
        (status, body).into_response()
    }
}
