use crate::api::AppState;
use axum::{
    extract::State,
    response::sse::{Event, Sse},
    routing::get,
    Router,
};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant};
use tokio_stream::{wrappers::IntervalStream, Stream, StreamExt};
use tracing::error;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/stream/alerts", get(stream_alerts))
        .route("/stream/vehicles", get(stream_vehicles))
        .with_state(state)
}

/// GET /stream/alerts - Live alert feed as Server-Sent Events
async fn stream_alerts(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let retry = state.retry;
    let alerts = state
        .broadcaster
        .subscribe_alerts()
        .map(move |alert| Ok(data_event("alert", &alert, retry)));
    Sse::new(alerts.merge(heartbeats(state.heartbeat)))
}

/// GET /stream/vehicles - Live vehicle status feed as Server-Sent Events
async fn stream_vehicles(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let retry = state.retry;
    let updates = state
        .broadcaster
        .subscribe_vehicles()
        .map(move |status| Ok(data_event("vehicle-update", &status, retry)));
    Sse::new(updates.merge(heartbeats(state.heartbeat)))
}

/// Named SSE event carrying a JSON payload and a reconnect hint.
fn data_event<T: Serialize>(name: &str, payload: &T, retry: Duration) -> Event {
    match Event::default().event(name).retry(retry).json_data(payload) {
        Ok(event) => event,
        Err(e) => {
            error!(error = %e, event = name, "Failed to encode SSE payload");
            Event::default().comment("encode error")
        }
    }
}

/// Payload-free heartbeat events, first one a full period after connect.
fn heartbeats(period: Duration) -> impl Stream<Item = Result<Event, Infallible>> {
    IntervalStream::new(interval_at(Instant::now() + period, period))
        .map(|_| Ok(Event::default().event("heartbeat")))
}
