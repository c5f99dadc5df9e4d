use anyhow::{Context, Result};
use fleetwatch::api::{create_router, AppState};
use fleetwatch::broadcast::LiveBroadcaster;
use fleetwatch::config::{load_config, FleetConfig};
use fleetwatch::detect::{
    run_detector_worker, Detector, GeofenceMembershipTracker, IdleStateTracker, SpeedingDetector,
    WindowedIdleDetector,
};
use fleetwatch::dispatch::{run_dispatcher_worker, AlertDispatcher};
use fleetwatch::dlq::{run_dlq_logger, DlqRouter};
use fleetwatch::geofence::{GeofenceLocator, HttpGeofenceClient, NullGeofenceLocator};
use fleetwatch::intake::{run_intake_worker, IntakeProcessor, LiveStateSink};
use fleetwatch::nats::{AlertPublisher, GpsPublisher, NatsClient};
use fleetwatch::persist::{AlertStore, MemoryAlertStore};
use fleetwatch::rollup::run_rollup_loop;
use fleetwatch::status::StatusCache;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fleetwatch=info".into()),
        )
        .init();

    info!("Fleetwatch starting...");

    let config_path =
        std::env::var("FLEETWATCH_CONFIG").unwrap_or_else(|_| "fleetwatch.toml".to_string());
    let config = match load_config(&config_path) {
        Ok(config) => {
            info!(path = %config_path, "Configuration loaded");
            config
        }
        Err(e) => {
            warn!(path = %config_path, error = %e, "No config file, using defaults");
            FleetConfig::default()
        }
    };

    // Connect to NATS and ensure the streams exist
    let nats = NatsClient::connect(config.nats.clone()).await?;
    let jetstream = nats.jetstream().clone();

    // Shared state
    let status_cache = Arc::new(StatusCache::new());
    let broadcaster = Arc::new(LiveBroadcaster::new(&config.broadcast));
    let store: Arc<dyn AlertStore> = Arc::new(MemoryAlertStore::new());

    let locator: Arc<dyn GeofenceLocator> = if config.geofence.enabled {
        Arc::new(
            HttpGeofenceClient::new(&config.geofence)
                .context("Failed to build geofence client")?,
        )
    } else {
        info!("Geofence lookups disabled");
        Arc::new(NullGeofenceLocator)
    };

    // Intake worker: location stream into status cache, live updates, DLQ
    let intake = Arc::new(IntakeProcessor::new(
        Arc::new(LiveStateSink::new(
            Arc::clone(&status_cache),
            Arc::clone(&broadcaster),
        )),
        Arc::new(DlqRouter::new(jetstream.clone())),
    ));
    spawn_worker("intake", run_intake_worker(intake, jetstream.clone()));

    // Detector workers, one durable consumer per role
    let mut detectors: Vec<Arc<dyn Detector>> = Vec::new();
    if config.detection.idle_mode.windowed_enabled() {
        detectors.push(Arc::new(WindowedIdleDetector::new(&config.detection)));
    }
    if config.detection.idle_mode.tracker_enabled() {
        detectors.push(Arc::new(IdleStateTracker::new(&config.detection)));
    }
    detectors.push(Arc::new(SpeedingDetector::new(&config.detection)));
    detectors.push(Arc::new(GeofenceMembershipTracker::new(Arc::clone(
        &locator,
    ))));

    for detector in detectors {
        info!(role = %detector.role(), "Starting detector");
        spawn_worker(
            "detector",
            run_detector_worker(
                detector,
                jetstream.clone(),
                AlertPublisher::new(jetstream.clone()),
            ),
        );
    }

    // Dispatcher: alert stream through dedup, enrichment, persistence, fan-out
    let dispatcher = Arc::new(AlertDispatcher::new(
        &config.dedup,
        Arc::clone(&locator),
        Arc::clone(&store),
        Arc::clone(&broadcaster),
    ));
    spawn_worker(
        "dispatcher",
        run_dispatcher_worker(
            dispatcher,
            jetstream.clone(),
            Duration::from_secs(config.dedup.compact_interval_seconds),
        ),
    );

    // Passive dead-letter logger
    spawn_worker("dlq-logger", run_dlq_logger(jetstream.clone()));

    // Daily stats rollup
    tokio::spawn(run_rollup_loop(Arc::clone(&store), config.rollup.clone()));

    // HTTP API server
    let state = AppState {
        publisher: Arc::new(GpsPublisher::new(jetstream.clone())),
        status_cache: Arc::clone(&status_cache),
        broadcaster: Arc::clone(&broadcaster),
        max_batch_events: config.api.max_batch_events,
        heartbeat: Duration::from_secs(config.broadcast.heartbeat_seconds),
        retry: Duration::from_millis(config.broadcast.retry_ms),
    };
    let router = create_router(state).layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.api.bind)
        .await
        .context("Failed to bind API address")?;
    info!(addr = %config.api.bind, "API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!(error = %e, "API server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    info!("Fleetwatch stopped");

    Ok(())
}

fn spawn_worker<F>(name: &'static str, worker: F)
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = worker.await {
            error!(worker = name, error = %e, "Worker exited with error");
        }
    });
}
