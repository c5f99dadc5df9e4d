use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

mod validation;

pub use validation::{validate_and_prepare, ValidationError};

/// LocationEvent is a single GPS fix reported by a vehicle.
///
/// Events are immutable once prepared. Ordering within a vehicle follows
/// the stream's publish order (one subject per vehicle).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LocationEvent {
    /// UUIDv7 identifier (time-ordered, globally unique)
    /// Auto-generated if not provided
    #[serde(rename = "eventId")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,

    /// Vehicle identity; also the stream subject token, so the
    /// character set is restricted (alphanumerics, `-`, `_`)
    #[serde(rename = "vehicleId")]
    pub vehicle_id: String,

    /// Degrees, -90..=90
    #[serde(alias = "lat")]
    pub latitude: f64,

    /// Degrees, -180..=180
    #[serde(alias = "lng")]
    pub longitude: f64,

    /// Speed in km/h; detectors that need it skip events without one
    #[serde(alias = "speedKph")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,

    /// Compass heading in degrees
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,

    /// Producer event time; receipt time is substituted when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl LocationEvent {
    /// Validates and prepares an event for ingestion.
    ///
    /// This method:
    /// - Validates the vehicle id is present and subject-safe
    /// - Validates coordinates are finite and in range
    /// - Validates speed/heading, when present, are usable numbers
    /// - Generates a UUIDv7 for event_id if missing
    /// - Fills timestamp with the receipt time if missing
    ///
    /// Returns Ok(()) if valid, Err(ValidationError) otherwise.
    pub fn validate_and_prepare(&mut self) -> Result<(), ValidationError> {
        validation::validate_and_prepare(self)
    }

    /// Event time, falling back to receipt time for events published
    /// directly to the stream without one.
    pub fn event_time(&self) -> DateTime<Utc> {
        self.timestamp.unwrap_or_else(Utc::now)
    }
}

/// Alert categories derived from the location stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    Idle,
    Speeding,
    GeofenceEnter,
    GeofenceExit,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Idle => "IDLE",
            AlertType::Speeding => "SPEEDING",
            AlertType::GeofenceEnter => "GEOFENCE_ENTER",
            AlertType::GeofenceExit => "GEOFENCE_EXIT",
        }
    }

    pub fn default_severity(&self) -> Severity {
        match self {
            AlertType::Idle => Severity::Medium,
            AlertType::Speeding => Severity::High,
            AlertType::GeofenceEnter => Severity::Medium,
            AlertType::GeofenceExit => Severity::Medium,
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// AlertEvent is the unit published on the alert stream and fanned out
/// to live subscribers.
///
/// `details` is a JSON object whose schema varies by alert type.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEvent {
    pub vehicle_id: String,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub details: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    /// RFC 3339 with millisecond precision on the wire
    #[serde(with = "ts_millis")]
    pub timestamp: DateTime<Utc>,
}

impl AlertEvent {
    /// Builds an alert with the default severity for its type.
    pub fn new(
        vehicle_id: impl Into<String>,
        alert_type: AlertType,
        details: Value,
        latitude: Option<f64>,
        longitude: Option<f64>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            severity: alert_type.default_severity(),
            alert_type,
            details,
            latitude,
            longitude,
            timestamp,
        }
    }
}

/// Timestamp codec for the alert wire format: RFC 3339, millisecond
/// precision, `Z` offset (e.g. `2026-08-25T14:03:07.123Z`).
pub mod ts_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// Why a raw stream payload could not be turned into a usable event.
#[derive(Debug)]
pub enum DecodeError {
    Parse(serde_json::Error),
    Invalid(ValidationError),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Parse(e) => write!(f, "malformed JSON: {}", e),
            DecodeError::Invalid(e) => write!(f, "invalid event: {}", e),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Decodes and prepares a location event from a raw stream payload.
///
/// Shared by every stream consumer: the intake worker routes failures to
/// the dead-letter stream, detector workers skip them silently.
pub fn decode_location(payload: &[u8]) -> Result<LocationEvent, DecodeError> {
    let mut event: LocationEvent = serde_json::from_slice(payload).map_err(DecodeError::Parse)?;
    event.validate_and_prepare().map_err(DecodeError::Invalid)?;
    Ok(event)
}
