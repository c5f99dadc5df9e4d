use super::Detector;
use crate::event::{AlertEvent, AlertType, LocationEvent};
use crate::geofence::GeofenceLocator;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

/// Tracks which geofences each vehicle is currently inside and turns
/// membership changes into ENTER/EXIT alerts.
///
/// The stored map is replaced wholesale on every processed event. A
/// failed lookup degrades to the empty set, which reads as exiting
/// everything; re-entry alerts fire once the lookup recovers.
pub struct GeofenceMembershipTracker {
    locator: Arc<dyn GeofenceLocator>,
    /// vehicle id -> (geofence id -> geofence name)
    memberships: DashMap<String, HashMap<i64, String>>,
}

impl GeofenceMembershipTracker {
    pub fn new(locator: Arc<dyn GeofenceLocator>) -> Self {
        Self {
            locator,
            memberships: DashMap::new(),
        }
    }

    fn membership_alert(
        event: &LocationEvent,
        alert_type: AlertType,
        id: i64,
        name: &str,
    ) -> AlertEvent {
        AlertEvent::new(
            event.vehicle_id.clone(),
            alert_type,
            json!({
                "geofence_id": id,
                "geofence_name": name,
            }),
            Some(event.latitude),
            Some(event.longitude),
            Utc::now(),
        )
    }
}

#[async_trait]
impl Detector for GeofenceMembershipTracker {
    fn role(&self) -> &'static str {
        "geofence"
    }

    async fn on_event(&self, event: &LocationEvent) -> Vec<AlertEvent> {
        let containing = self
            .locator
            .containing_point(event.latitude, event.longitude)
            .await;

        let current: HashMap<i64, String> =
            containing.into_iter().map(|g| (g.id, g.name)).collect();

        let previous = self
            .memberships
            .get(&event.vehicle_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();

        let mut alerts = Vec::new();
        for (id, name) in &current {
            if !previous.contains_key(id) {
                alerts.push(Self::membership_alert(event, AlertType::GeofenceEnter, *id, name));
            }
        }
        for (id, name) in &previous {
            if !current.contains_key(id) {
                alerts.push(Self::membership_alert(event, AlertType::GeofenceExit, *id, name));
            }
        }

        self.memberships.insert(event.vehicle_id.clone(), current);
        alerts
    }
}
