use crate::broadcast::LiveBroadcaster;
use crate::dlq::{DlqSink, FailureKind};
use crate::event::{self, LocationEvent};
use crate::nats::{tail_consumer, GPS_STREAM, GPS_SUBJECTS};
use crate::status::{StatusCache, VehicleStatus};
use anyhow::Result;
use async_nats::jetstream;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Where a decoded location lands. An error from `apply` is classified
/// as a processing failure and dead-letters the original message, so
/// impls must not partially commit before returning one.
#[async_trait]
pub trait LocationSink: Send + Sync {
    async fn apply(&self, event: &LocationEvent) -> Result<()>;
}

/// Refreshes the vehicle status cache and pushes the position to live
/// subscribers.
pub struct LiveStateSink {
    status_cache: Arc<StatusCache>,
    broadcaster: Arc<LiveBroadcaster>,
}

impl LiveStateSink {
    pub fn new(status_cache: Arc<StatusCache>, broadcaster: Arc<LiveBroadcaster>) -> Self {
        Self {
            status_cache,
            broadcaster,
        }
    }
}

#[async_trait]
impl LocationSink for LiveStateSink {
    async fn apply(&self, event: &LocationEvent) -> Result<()> {
        let status = VehicleStatus::from_event(event);
        self.status_cache.update(status.clone());
        self.broadcaster.publish_vehicle(&status);
        Ok(())
    }
}

/// First consumer of the location stream: validates each message,
/// refreshes the vehicle status cache, and pushes the position to live
/// subscribers. Anything unusable goes to the dead-letter stream.
///
/// This is the only worker that dead-letters; detector workers skip bad
/// payloads silently so each one appears on the DLQ exactly once.
pub struct IntakeProcessor {
    sink: Arc<dyn LocationSink>,
    dlq: Arc<dyn DlqSink>,
}

impl IntakeProcessor {
    pub fn new(sink: Arc<dyn LocationSink>, dlq: Arc<dyn DlqSink>) -> Self {
        Self { sink, dlq }
    }

    /// Handles one raw stream message. Never returns an error: every
    /// failure class ends in a dead-letter route so the caller can ack
    /// unconditionally.
    pub async fn process_message(&self, subject: &str, sequence: u64, payload: &[u8]) {
        let event = match event::decode_location(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(subject = %subject, error = %e, "Rejecting malformed location event");
                self.dead_letter(subject, sequence, payload, FailureKind::InvalidPayload, &e)
                    .await;
                return;
            }
        };

        if let Err(e) = self.sink.apply(&event).await {
            error!(
                vehicle_id = %event.vehicle_id,
                error = %e,
                "Failed to process location event"
            );
            self.dead_letter(subject, sequence, payload, FailureKind::ProcessingError, &e)
                .await;
        }
    }

    async fn dead_letter(
        &self,
        subject: &str,
        sequence: u64,
        payload: &[u8],
        kind: FailureKind,
        cause: &(dyn std::fmt::Display + Sync),
    ) {
        if let Err(e) = self
            .dlq
            .route(subject, sequence, payload, kind, &cause.to_string())
            .await
        {
            // The message is acked regardless, so this is potential data loss
            error!(
                subject = %subject,
                sequence = sequence,
                error = %e,
                "Failed to dead-letter message"
            );
        }
    }
}

/// Runs the intake processor over the location stream. The message is
/// acknowledged in every branch; redelivering a malformed payload would
/// only dead-letter it again.
pub async fn run_intake_worker(
    processor: Arc<IntakeProcessor>,
    jetstream: jetstream::Context,
) -> Result<()> {
    let consumer = tail_consumer(&jetstream, GPS_STREAM, "fleet-intake", GPS_SUBJECTS).await?;
    let mut messages = consumer.messages().await?;

    info!("Intake worker started");

    while let Some(msg) = messages.next().await {
        match msg {
            Ok(msg) => {
                let sequence = match msg.info() {
                    Ok(info) => info.stream_sequence,
                    Err(e) => {
                        error!(error = %e, "Failed to get message info");
                        let _ = msg.ack().await;
                        continue;
                    }
                };

                processor
                    .process_message(msg.subject.as_str(), sequence, &msg.payload)
                    .await;

                if let Err(e) = msg.ack().await {
                    error!(error = %e, "Failed to acknowledge message");
                }
            }
            Err(e) => {
                error!(error = %e, "Error receiving message");
            }
        }
    }

    warn!("Intake worker stream ended");
    Ok(())
}
