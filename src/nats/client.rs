use anyhow::{Context, Result};
use async_nats::jetstream::{self, stream};
use serde::Deserialize;
use tracing::info;

/// GPS fix stream: one subject per vehicle, so per-vehicle order
/// follows publish order.
pub const GPS_STREAM: &str = "FLEET_GPS";
pub const GPS_SUBJECTS: &str = "fleet.gps.>";

/// Derived alert stream, keyed the same way as the GPS stream.
pub const ALERT_STREAM: &str = "FLEET_ALERTS";
pub const ALERT_SUBJECTS: &str = "fleet.alerts.>";

/// Dead-letter stream for inbound messages that could not be processed.
pub const DLQ_STREAM: &str = "FLEET_DLQ";
pub const DLQ_SUBJECTS: &str = "fleet.dlq.>";
pub const DLQ_GPS_SUBJECT: &str = "fleet.dlq.gps";

pub fn gps_subject(vehicle_id: &str) -> String {
    format!("fleet.gps.{}", vehicle_id)
}

pub fn alert_subject(vehicle_id: &str) -> String {
    format!("fleet.alerts.{}", vehicle_id)
}

/// NATS configuration
#[derive(Clone, Debug, Deserialize)]
pub struct NatsConfig {
    pub url: String,
    #[serde(default = "default_max_age_days")]
    pub max_age_days: i64,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: i64,
}

fn default_max_age_days() -> i64 {
    7
}

fn default_max_bytes() -> i64 {
    10 * 1024 * 1024 * 1024 // 10GB
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string()),
            max_age_days: default_max_age_days(),
            max_bytes: default_max_bytes(),
        }
    }
}

/// NATS client with JetStream
pub struct NatsClient {
    client: async_nats::Client,
    jetstream: jetstream::Context,
    config: NatsConfig,
}

impl NatsClient {
    /// Connect to NATS and ensure the pipeline streams exist
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        info!("Connecting to NATS at {}", config.url);

        let client = async_nats::connect(&config.url)
            .await
            .context("Failed to connect to NATS")?;

        let jetstream = jetstream::new(client.clone());

        let nats_client = Self {
            client,
            jetstream,
            config,
        };

        nats_client.ensure_stream(GPS_STREAM, GPS_SUBJECTS).await?;
        nats_client.ensure_stream(ALERT_STREAM, ALERT_SUBJECTS).await?;
        nats_client.ensure_stream(DLQ_STREAM, DLQ_SUBJECTS).await?;

        Ok(nats_client)
    }

    /// Ensure a JetStream stream exists with proper configuration
    async fn ensure_stream(&self, name: &str, subjects: &str) -> Result<()> {
        // Check if stream exists
        match self.jetstream.get_stream(name).await {
            Ok(_existing_stream) => {
                info!("Stream '{}' already exists", name);
                return Ok(());
            }
            Err(_) => {
                info!("Stream '{}' does not exist, creating...", name);
            }
        }

        let stream_config = stream::Config {
            name: name.to_string(),
            subjects: vec![subjects.to_string()],
            max_age: std::time::Duration::from_secs((self.config.max_age_days * 86400) as u64),
            max_bytes: self.config.max_bytes,
            storage: stream::StorageType::File,
            retention: stream::RetentionPolicy::Limits,
            ..Default::default()
        };

        self.jetstream
            .create_stream(stream_config)
            .await
            .context(format!("Failed to create JetStream stream '{}'", name))?;

        info!("Created JetStream stream '{}'", name);
        Ok(())
    }

    /// Get JetStream context for publishing and consumer creation
    pub fn jetstream(&self) -> &jetstream::Context {
        &self.jetstream
    }

    /// Get underlying NATS client
    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }
}
