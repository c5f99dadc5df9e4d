use crate::event::LocationEvent;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Latest known state of one vehicle, as served by the vehicles API and
/// pushed on the vehicle update stream.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleStatus {
    pub vehicle_id: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    pub status: String,
    pub last_update: DateTime<Utc>,
}

impl VehicleStatus {
    pub fn from_position(
        vehicle_id: impl Into<String>,
        latitude: f64,
        longitude: f64,
        speed: Option<f64>,
        heading: Option<f64>,
        last_update: DateTime<Utc>,
    ) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            latitude,
            longitude,
            speed,
            heading,
            status: "ACTIVE".to_string(),
            last_update,
        }
    }

    pub fn from_event(event: &LocationEvent) -> Self {
        Self::from_position(
            event.vehicle_id.clone(),
            event.latitude,
            event.longitude,
            event.speed,
            event.heading,
            event.event_time(),
        )
    }
}

/// Latest-value cache keyed by vehicle id. Every processed fix replaces
/// the previous entry for its vehicle.
pub struct StatusCache {
    vehicles: DashMap<String, VehicleStatus>,
}

impl StatusCache {
    pub fn new() -> Self {
        Self {
            vehicles: DashMap::new(),
        }
    }

    pub fn update(&self, status: VehicleStatus) {
        self.vehicles.insert(status.vehicle_id.clone(), status);
    }

    pub fn get(&self, vehicle_id: &str) -> Option<VehicleStatus> {
        self.vehicles.get(vehicle_id).map(|entry| entry.value().clone())
    }

    /// All known vehicles, sorted by id for stable API output
    pub fn all(&self) -> Vec<VehicleStatus> {
        let mut statuses: Vec<VehicleStatus> = self
            .vehicles
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        statuses.sort_by(|a, b| a.vehicle_id.cmp(&b.vehicle_id));
        statuses
    }

    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }
}

impl Default for StatusCache {
    fn default() -> Self {
        Self::new()
    }
}
