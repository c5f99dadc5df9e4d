use crate::event::{self, AlertEvent, LocationEvent};
use crate::nats::{tail_consumer, AlertPublisher, GPS_STREAM, GPS_SUBJECTS};
use anyhow::Result;
use async_nats::jetstream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

mod geofence;
mod idle_state;
mod idle_window;
mod speeding;

pub use geofence::GeofenceMembershipTracker;
pub use idle_state::IdleStateTracker;
pub use idle_window::WindowedIdleDetector;
pub use speeding::SpeedingDetector;

/// Wall-clock cadence for time-driven detector work (window closing)
const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// A stream detector: consumes the location stream, owns its per-vehicle
/// state, and emits derived alerts.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Short role name; also names the durable consumer
    fn role(&self) -> &'static str;

    /// Feed one prepared location event
    async fn on_event(&self, event: &LocationEvent) -> Vec<AlertEvent>;

    /// Wall-clock pass for emissions not triggered by an event arriving
    /// (e.g. closing a window for a vehicle that went quiet)
    fn sweep(&self, _now: DateTime<Utc>) -> Vec<AlertEvent> {
        Vec::new()
    }
}

/// Runs one detector over the location stream.
///
/// Events are processed inline, so per-vehicle order follows the
/// stream's publish order. Undecodable payloads are skipped here; the
/// intake worker owns dead-lettering, which keeps each bad message to a
/// single DLQ appearance.
pub async fn run_detector_worker(
    detector: Arc<dyn Detector>,
    jetstream: jetstream::Context,
    publisher: AlertPublisher,
) -> Result<()> {
    let durable = format!("fleet-{}", detector.role());
    let consumer = tail_consumer(&jetstream, GPS_STREAM, &durable, GPS_SUBJECTS).await?;
    let mut messages = consumer.messages().await?;

    let mut sweep_tick = tokio::time::interval(SWEEP_INTERVAL);
    sweep_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(role = %detector.role(), "Detector worker started");

    loop {
        tokio::select! {
            next = messages.next() => {
                let msg = match next {
                    Some(m) => m,
                    None => break,
                };

                match msg {
                    Ok(msg) => {
                        match event::decode_location(&msg.payload) {
                            Ok(event) => {
                                let alerts = detector.on_event(&event).await;
                                publish_alerts(&publisher, detector.role(), alerts).await;
                            }
                            Err(e) => {
                                debug!(role = %detector.role(), error = %e, "Skipping undecodable event");
                            }
                        }
                        if let Err(e) = msg.ack().await {
                            error!(role = %detector.role(), error = %e, "Failed to acknowledge message");
                        }
                    }
                    Err(e) => {
                        error!(role = %detector.role(), error = %e, "Error receiving message");
                    }
                }
            }
            _ = sweep_tick.tick() => {
                let alerts = detector.sweep(Utc::now());
                publish_alerts(&publisher, detector.role(), alerts).await;
            }
        }
    }

    warn!(role = %detector.role(), "Detector worker stream ended");
    Ok(())
}

/// A failed alert publish is logged and dropped rather than retried via
/// redelivery: replaying the location event would double-apply keyed
/// detector state.
async fn publish_alerts(publisher: &AlertPublisher, role: &str, alerts: Vec<AlertEvent>) {
    for alert in alerts {
        if let Err(e) = publisher.publish(&alert).await {
            error!(
                role = %role,
                vehicle_id = %alert.vehicle_id,
                alert_type = %alert.alert_type,
                error = %e,
                "Failed to publish alert"
            );
        }
    }
}
