use crate::nats::{tail_consumer, DLQ_GPS_SUBJECT, DLQ_STREAM, DLQ_SUBJECTS, GPS_STREAM};
use anyhow::{Context, Result};
use async_nats::jetstream;
use async_nats::HeaderMap;
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use tracing::{error, info, warn};

/// Why a message was dead-lettered. The wire form of these names is
/// part of the DLQ contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// The payload could not be parsed or failed validation; retrying
    /// can never succeed
    InvalidPayload,
    /// The payload was well-formed but processing it failed
    ProcessingError,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::InvalidPayload => "InvalidPayload",
            FailureKind::ProcessingError => "ProcessingError",
        }
    }
}

/// Dead-letter seam for the intake worker. The error return lets the
/// caller log the potential data loss; the original message is
/// acknowledged either way so one bad payload can never wedge the
/// stream.
#[async_trait]
pub trait DlqSink: Send + Sync {
    async fn route(
        &self,
        original_subject: &str,
        stream_sequence: u64,
        payload: &[u8],
        kind: FailureKind,
        error_message: &str,
    ) -> Result<()>;
}

/// Publishes failed messages to the dead-letter stream, carrying the
/// original payload unmodified plus diagnostic headers.
pub struct DlqRouter {
    jetstream: jetstream::Context,
}

impl DlqRouter {
    pub fn new(jetstream: jetstream::Context) -> Self {
        Self { jetstream }
    }
}

#[async_trait]
impl DlqSink for DlqRouter {
    async fn route(
        &self,
        original_subject: &str,
        stream_sequence: u64,
        payload: &[u8],
        kind: FailureKind,
        error_message: &str,
    ) -> Result<()> {
        let sequence = stream_sequence.to_string();
        let failed_at = Utc::now().timestamp_millis().to_string();
        let payload_length = payload.len().to_string();

        let mut headers = HeaderMap::new();
        headers.insert("dlq-original-subject", original_subject);
        headers.insert("dlq-original-stream", GPS_STREAM);
        headers.insert("dlq-original-sequence", sequence.as_str());
        headers.insert("dlq-error-type", kind.as_str());
        headers.insert("dlq-error-message", error_message);
        headers.insert("dlq-failed-at", failed_at.as_str());
        headers.insert("dlq-payload-length", payload_length.as_str());

        self.jetstream
            .publish_with_headers(DLQ_GPS_SUBJECT, headers, payload.to_vec().into())
            .await
            .context("Failed to publish to dead-letter stream")?
            .await
            .context("Failed to await dead-letter publish ack")?;

        Ok(())
    }
}

fn header_str<'a>(headers: Option<&'a HeaderMap>, name: &str) -> &'a str {
    headers
        .and_then(|h| h.get(name))
        .map(|v| v.as_str())
        .unwrap_or("unknown")
}

/// Passive dead-letter consumer: surfaces every dead-lettered message
/// in the logs and does nothing else. Replay tooling, when it exists,
/// reads the stream directly.
pub async fn run_dlq_logger(jetstream: jetstream::Context) -> Result<()> {
    let consumer = tail_consumer(&jetstream, DLQ_STREAM, "fleet-dlq-logger", DLQ_SUBJECTS).await?;
    let mut messages = consumer.messages().await?;

    info!("DLQ logger started");

    while let Some(msg) = messages.next().await {
        match msg {
            Ok(msg) => {
                let headers = msg.headers.as_ref();
                warn!(
                    original_subject = %header_str(headers, "dlq-original-subject"),
                    original_sequence = %header_str(headers, "dlq-original-sequence"),
                    error_type = %header_str(headers, "dlq-error-type"),
                    error_message = %header_str(headers, "dlq-error-message"),
                    failed_at = %header_str(headers, "dlq-failed-at"),
                    payload_length = %header_str(headers, "dlq-payload-length"),
                    "Dead-lettered message"
                );

                if let Err(e) = msg.ack().await {
                    error!(error = %e, "Failed to acknowledge message");
                }
            }
            Err(e) => {
                error!(error = %e, "Error receiving message");
            }
        }
    }

    warn!("DLQ logger stream ended");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_wire_names() {
        assert_eq!(FailureKind::InvalidPayload.as_str(), "InvalidPayload");
        assert_eq!(FailureKind::ProcessingError.as_str(), "ProcessingError");
    }

    #[test]
    fn test_header_str_falls_back_to_unknown() {
        assert_eq!(header_str(None, "dlq-error-type"), "unknown");

        let mut headers = HeaderMap::new();
        headers.insert("dlq-error-type", "InvalidPayload");
        assert_eq!(header_str(Some(&headers), "dlq-error-type"), "InvalidPayload");
        assert_eq!(header_str(Some(&headers), "dlq-error-message"), "unknown");
    }
}
