use crate::event::{AlertEvent, LocationEvent};
use crate::nats::client::{alert_subject, gps_subject};
use anyhow::{Context, Result};
use async_nats::jetstream;
use async_trait::async_trait;
use tracing::debug;

/// Publishing seam for the ingestion API, so HTTP handlers can be
/// exercised without a broker.
#[async_trait]
pub trait LocationPublisher: Send + Sync {
    async fn publish(&self, event: &LocationEvent) -> Result<()>;
}

/// Location event publisher for NATS JetStream
#[derive(Clone)]
pub struct GpsPublisher {
    jetstream: jetstream::Context,
}

impl GpsPublisher {
    pub fn new(jetstream: jetstream::Context) -> Self {
        Self { jetstream }
    }
}

#[async_trait]
impl LocationPublisher for GpsPublisher {
    /// Publish a single location event
    ///
    /// Subject format: fleet.gps.{vehicleId}
    /// Payload: JSON-serialized LocationEvent
    async fn publish(&self, event: &LocationEvent) -> Result<()> {
        let subject = gps_subject(&event.vehicle_id);
        let payload = serde_json::to_vec(event)
            .context("Failed to serialize location event to JSON")?;

        debug!(
            vehicle_id = %event.vehicle_id,
            subject = %subject,
            "Publishing location event to NATS"
        );

        self.jetstream
            .publish(subject.clone(), payload.into())
            .await
            .context(format!("Failed to publish location event to subject '{}'", subject))?
            .await
            .context("Failed to await publish ack")?;

        Ok(())
    }
}

/// Alert publisher for NATS JetStream
///
/// Subject format: fleet.alerts.{vehicleId}, so alert order per vehicle
/// matches the order detectors emitted them.
#[derive(Clone)]
pub struct AlertPublisher {
    jetstream: jetstream::Context,
}

impl AlertPublisher {
    pub fn new(jetstream: jetstream::Context) -> Self {
        Self { jetstream }
    }

    pub async fn publish(&self, alert: &AlertEvent) -> Result<()> {
        let subject = alert_subject(&alert.vehicle_id);
        let payload = serde_json::to_vec(alert)
            .context("Failed to serialize alert to JSON")?;

        debug!(
            vehicle_id = %alert.vehicle_id,
            alert_type = %alert.alert_type,
            subject = %subject,
            "Publishing alert to NATS"
        );

        self.jetstream
            .publish(subject.clone(), payload.into())
            .await
            .context(format!("Failed to publish alert to subject '{}'", subject))?
            .await
            .context("Failed to await publish ack")?;

        Ok(())
    }
}
