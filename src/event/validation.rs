use super::LocationEvent;
use chrono::Utc;
use std::fmt;
use uuid::Uuid;

/// Validation errors for LocationEvent
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    MissingVehicleId,
    InvalidVehicleId(String),
    InvalidLatitude(f64),
    InvalidLongitude(f64),
    InvalidSpeed(f64),
    InvalidHeading(f64),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::MissingVehicleId => write!(f, "vehicleId is required"),
            ValidationError::InvalidVehicleId(id) => {
                write!(f, "invalid vehicleId '{}': must be 1-64 alphanumeric characters, '-' or '_'", id)
            }
            ValidationError::InvalidLatitude(lat) => {
                write!(f, "latitude must be between -90 and 90, got {}", lat)
            }
            ValidationError::InvalidLongitude(lon) => {
                write!(f, "longitude must be between -180 and 180, got {}", lon)
            }
            ValidationError::InvalidSpeed(s) => {
                write!(f, "speed must be a non-negative number, got {}", s)
            }
            ValidationError::InvalidHeading(h) => {
                write!(f, "heading must be a finite number, got {}", h)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validates and prepares a LocationEvent for ingestion.
///
/// Validation rules:
/// - VehicleId: required, 1-64 chars, alphanumeric plus '-' and '_'
///   (the id becomes a stream subject token)
/// - Latitude/longitude: finite, within geographic range
/// - Speed: when present, finite and non-negative
/// - Heading: when present, finite (NaN cannot be serialized)
/// - EventId: auto-generated UUIDv7 if missing or empty
/// - Timestamp: receipt time substituted if missing
pub fn validate_and_prepare(event: &mut LocationEvent) -> Result<(), ValidationError> {
    if event.vehicle_id.is_empty() {
        return Err(ValidationError::MissingVehicleId);
    }
    if !is_valid_vehicle_id(&event.vehicle_id) {
        return Err(ValidationError::InvalidVehicleId(event.vehicle_id.clone()));
    }

    if !(-90.0..=90.0).contains(&event.latitude) {
        return Err(ValidationError::InvalidLatitude(event.latitude));
    }
    if !(-180.0..=180.0).contains(&event.longitude) {
        return Err(ValidationError::InvalidLongitude(event.longitude));
    }

    if let Some(speed) = event.speed {
        if !speed.is_finite() || speed < 0.0 {
            return Err(ValidationError::InvalidSpeed(speed));
        }
    }
    if let Some(heading) = event.heading {
        if !heading.is_finite() {
            return Err(ValidationError::InvalidHeading(heading));
        }
    }

    // Generate UUIDv7 if missing or empty
    if event.event_id.is_none() || event.event_id.as_ref().map_or(false, |id| id.is_empty()) {
        event.event_id = Some(Uuid::now_v7().to_string());
    }

    // Receipt time stands in for producers that send no event time
    if event.timestamp.is_none() {
        event.timestamp = Some(Utc::now());
    }

    Ok(())
}

/// Validates a vehicle id for use as a stream subject token.
///
/// Valid vehicle ids:
/// - ASCII letters and digits
/// - Hyphens and underscores
/// - At most 64 characters
fn is_valid_vehicle_id(id: &str) -> bool {
    if id.is_empty() || id.len() > 64 {
        return false;
    }

    id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod validation_tests {
    use super::*;

    #[test]
    fn test_valid_vehicle_ids() {
        assert!(is_valid_vehicle_id("VH-001"));
        assert!(is_valid_vehicle_id("truck_42"));
        assert!(is_valid_vehicle_id("a"));
        assert!(is_valid_vehicle_id("FLEET-NORTH-0193"));
    }

    #[test]
    fn test_invalid_vehicle_ids() {
        assert!(!is_valid_vehicle_id(""));
        assert!(!is_valid_vehicle_id("VH 001"));
        assert!(!is_valid_vehicle_id("VH.001"));
        assert!(!is_valid_vehicle_id("fleet.gps"));
        assert!(!is_valid_vehicle_id("VH*"));
        assert!(!is_valid_vehicle_id("VH>"));
        assert!(!is_valid_vehicle_id(&"x".repeat(65)));
    }
}
