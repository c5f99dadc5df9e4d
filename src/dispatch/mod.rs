// Alert dispatch: dedup -> enrich -> persist -> forward
//
// The dispatcher is the single authority on duplicate suppression.
// Detectors may emit overlapping alerts (both idle detectors can fire
// for the same stop); only what passes this gate is persisted and
// reaches live subscribers.

use crate::broadcast::LiveBroadcaster;
use crate::config::DedupConfig;
use crate::event::{AlertEvent, AlertType};
use crate::geofence::GeofenceLocator;
use crate::nats::{tail_consumer, ALERT_STREAM, ALERT_SUBJECTS};
use crate::persist::AlertStore;
use anyhow::Result;
use async_nats::jetstream;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Suppression window per (vehicle, alert type).
///
/// Entries expire lazily on lookup; compact() drops the stale ones so
/// the map does not grow with every vehicle ever seen.
pub struct DedupCache {
    window: Duration,
    seen: DashMap<(String, AlertType), DateTime<Utc>>,
}

impl DedupCache {
    pub fn new(window_seconds: i64) -> Self {
        Self {
            window: Duration::seconds(window_seconds),
            seen: DashMap::new(),
        }
    }

    /// True when the alert is fresh; records it as the latest dispatch.
    /// False when an alert of the same key was dispatched within the
    /// window.
    pub fn check_and_record(
        &self,
        vehicle_id: &str,
        alert_type: AlertType,
        now: DateTime<Utc>,
    ) -> bool {
        match self.seen.entry((vehicle_id.to_string(), alert_type)) {
            Entry::Occupied(mut occupied) => {
                if now.signed_duration_since(*occupied.get()) >= self.window {
                    occupied.insert(now);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(now);
                true
            }
        }
    }

    /// Drop entries whose window has fully elapsed
    pub fn compact(&self, now: DateTime<Utc>) {
        self.seen
            .retain(|_, last| now.signed_duration_since(*last) < self.window);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Terminal stage of the alert path
pub struct AlertDispatcher {
    dedup: DedupCache,
    locator: Arc<dyn GeofenceLocator>,
    store: Arc<dyn AlertStore>,
    broadcaster: Arc<LiveBroadcaster>,
}

impl AlertDispatcher {
    pub fn new(
        config: &DedupConfig,
        locator: Arc<dyn GeofenceLocator>,
        store: Arc<dyn AlertStore>,
        broadcaster: Arc<LiveBroadcaster>,
    ) -> Self {
        Self {
            dedup: DedupCache::new(config.window_seconds),
            locator,
            store,
            broadcaster,
        }
    }

    /// Runs one alert through dedup, enrichment, persistence and the
    /// live fan-out. Persistence failure is logged and does not stop
    /// the alert from reaching subscribers.
    pub async fn dispatch(&self, mut alert: AlertEvent) {
        if !self
            .dedup
            .check_and_record(&alert.vehicle_id, alert.alert_type, alert.timestamp)
        {
            debug!(
                vehicle_id = %alert.vehicle_id,
                alert_type = %alert.alert_type,
                "Duplicate alert suppressed"
            );
            return;
        }

        self.enrich(&mut alert).await;

        if let Err(e) = self.store.save_alert(&alert).await {
            error!(
                vehicle_id = %alert.vehicle_id,
                alert_type = %alert.alert_type,
                error = %e,
                "Failed to persist alert, forwarding anyway"
            );
        }

        self.broadcaster.publish_alert(&alert);

        info!(
            vehicle_id = %alert.vehicle_id,
            alert_type = %alert.alert_type,
            severity = ?alert.severity,
            "Alert dispatched"
        );
    }

    /// Best-effort context: the names of geofences containing the alert
    /// position, comma-joined under a `geofences` detail key. A failed
    /// or empty lookup leaves the details untouched.
    async fn enrich(&self, alert: &mut AlertEvent) {
        let (lat, lon) = match (alert.latitude, alert.longitude) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => return,
        };

        let geofences = self.locator.containing_point(lat, lon).await;
        if geofences.is_empty() {
            return;
        }

        let names = geofences
            .iter()
            .map(|g| g.name.as_str())
            .collect::<Vec<_>>()
            .join(",");

        if let Some(details) = alert.details.as_object_mut() {
            details.insert("geofences".to_string(), Value::String(names));
        }
    }

    pub fn compact_dedup(&self, now: DateTime<Utc>) {
        self.dedup.compact(now);
    }
}

/// Consumes the alert stream and runs every alert through the
/// dispatcher. Malformed alert payloads are logged and acknowledged;
/// the alert stream has no dead-letter lane.
pub async fn run_dispatcher_worker(
    dispatcher: Arc<AlertDispatcher>,
    jetstream: jetstream::Context,
    compact_interval: std::time::Duration,
) -> Result<()> {
    let consumer = tail_consumer(&jetstream, ALERT_STREAM, "fleet-dispatcher", ALERT_SUBJECTS).await?;
    let mut messages = consumer.messages().await?;

    let mut compact_tick = tokio::time::interval(compact_interval);
    compact_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("Dispatcher worker started");

    loop {
        tokio::select! {
            next = messages.next() => {
                let msg = match next {
                    Some(m) => m,
                    None => break,
                };

                match msg {
                    Ok(msg) => {
                        match serde_json::from_slice::<AlertEvent>(&msg.payload) {
                            Ok(alert) => dispatcher.dispatch(alert).await,
                            Err(e) => {
                                error!(error = %e, "Failed to deserialize alert, skipping");
                            }
                        }
                        if let Err(e) = msg.ack().await {
                            error!(error = %e, "Failed to acknowledge message");
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Error receiving message");
                    }
                }
            }
            _ = compact_tick.tick() => {
                dispatcher.compact_dedup(Utc::now());
            }
        }
    }

    warn!("Dispatcher worker stream ended");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BroadcastConfig;
    use crate::geofence::{GeofenceRef, NullGeofenceLocator};
    use crate::persist::MemoryAlertStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::json;
    use uuid::Uuid;

    struct FixedLocator(Vec<GeofenceRef>);

    #[async_trait]
    impl GeofenceLocator for FixedLocator {
        async fn containing_point(&self, _lat: f64, _lon: f64) -> Vec<GeofenceRef> {
            self.0.clone()
        }

        async fn near_point(&self, _lat: f64, _lon: f64, _radius_m: f64) -> Vec<GeofenceRef> {
            Vec::new()
        }
    }

    struct FailingStore;

    #[async_trait]
    impl AlertStore for FailingStore {
        async fn save_alert(&self, _alert: &AlertEvent) -> Result<Uuid> {
            anyhow::bail!("store unavailable")
        }

        async fn aggregate_daily_stats(&self, _now: DateTime<Utc>) -> Result<usize> {
            anyhow::bail!("store unavailable")
        }
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn alert_at(vehicle: &str, alert_type: AlertType, secs: i64) -> AlertEvent {
        AlertEvent::new(
            vehicle,
            alert_type,
            json!({"current_speed": 100.0}),
            Some(37.78),
            Some(-122.41),
            ts(secs),
        )
    }

    #[test]
    fn test_dedup_window_boundaries() {
        let cache = DedupCache::new(60);

        assert!(cache.check_and_record("VH-001", AlertType::Speeding, ts(0)));
        // Inside the window: suppressed
        assert!(!cache.check_and_record("VH-001", AlertType::Speeding, ts(30)));
        assert!(!cache.check_and_record("VH-001", AlertType::Speeding, ts(59)));
        // Window elapsed: fresh again
        assert!(cache.check_and_record("VH-001", AlertType::Speeding, ts(60)));
    }

    #[test]
    fn test_dedup_keys_are_per_vehicle_and_type() {
        let cache = DedupCache::new(60);

        assert!(cache.check_and_record("VH-001", AlertType::Speeding, ts(0)));
        // Same vehicle, different type
        assert!(cache.check_and_record("VH-001", AlertType::Idle, ts(1)));
        // Same type, different vehicle
        assert!(cache.check_and_record("VH-002", AlertType::Speeding, ts(1)));
    }

    #[test]
    fn test_dedup_compact_drops_expired_entries() {
        let cache = DedupCache::new(60);
        assert!(cache.is_empty());

        cache.check_and_record("VH-001", AlertType::Speeding, ts(0));
        cache.check_and_record("VH-002", AlertType::Idle, ts(50));
        assert_eq!(cache.len(), 2);
        assert!(!cache.is_empty());

        cache.compact(ts(70));
        assert_eq!(cache.len(), 1); // VH-001's entry expired
        cache.compact(ts(200));
        assert!(cache.is_empty());
    }

    fn dispatcher_with(
        locator: Arc<dyn GeofenceLocator>,
        store: Arc<dyn AlertStore>,
    ) -> (AlertDispatcher, Arc<LiveBroadcaster>) {
        let broadcaster = Arc::new(LiveBroadcaster::new(&BroadcastConfig::default()));
        let dispatcher = AlertDispatcher::new(
            &DedupConfig::default(),
            locator,
            store,
            Arc::clone(&broadcaster),
        );
        (dispatcher, broadcaster)
    }

    #[tokio::test]
    async fn test_duplicate_is_neither_stored_nor_broadcast() {
        let store = Arc::new(MemoryAlertStore::new());
        let (dispatcher, broadcaster) =
            dispatcher_with(Arc::new(NullGeofenceLocator), Arc::clone(&store) as _);
        let mut sub = broadcaster.subscribe_alerts();

        dispatcher.dispatch(alert_at("VH-001", AlertType::Speeding, 0)).await;
        dispatcher.dispatch(alert_at("VH-001", AlertType::Speeding, 10)).await;

        assert_eq!(store.alert_count(), 1);
        assert!(sub.try_recv().is_ok());
        assert!(sub.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_spaced_repeats_both_pass() {
        let store = Arc::new(MemoryAlertStore::new());
        let (dispatcher, _broadcaster) =
            dispatcher_with(Arc::new(NullGeofenceLocator), Arc::clone(&store) as _);

        dispatcher.dispatch(alert_at("VH-001", AlertType::Speeding, 0)).await;
        dispatcher.dispatch(alert_at("VH-001", AlertType::Speeding, 90)).await;

        assert_eq!(store.alert_count(), 2);
    }

    #[tokio::test]
    async fn test_types_deduplicate_independently() {
        let store = Arc::new(MemoryAlertStore::new());
        let (dispatcher, _broadcaster) =
            dispatcher_with(Arc::new(NullGeofenceLocator), Arc::clone(&store) as _);

        dispatcher.dispatch(alert_at("VH-001", AlertType::Speeding, 0)).await;
        dispatcher.dispatch(alert_at("VH-001", AlertType::GeofenceEnter, 1)).await;

        assert_eq!(store.alert_count(), 2);
    }

    #[tokio::test]
    async fn test_enrichment_appends_geofence_names() {
        let store = Arc::new(MemoryAlertStore::new());
        let locator = Arc::new(FixedLocator(vec![
            GeofenceRef { id: 1, name: "Downtown".to_string(), polygon: Vec::new() },
            GeofenceRef { id: 2, name: "Harbor".to_string(), polygon: Vec::new() },
        ]));
        let (dispatcher, broadcaster) = dispatcher_with(locator, Arc::clone(&store) as _);
        let mut sub = broadcaster.subscribe_alerts();

        dispatcher.dispatch(alert_at("VH-001", AlertType::Speeding, 0)).await;

        let stored = store.alerts_for("VH-001");
        assert_eq!(stored[0].details["geofences"], "Downtown,Harbor");
        // Original detail keys survive enrichment
        assert_eq!(stored[0].details["current_speed"], 100.0);
        // The broadcast copy is the enriched one
        assert_eq!(sub.try_recv().unwrap().details["geofences"], "Downtown,Harbor");
    }

    #[tokio::test]
    async fn test_empty_lookup_leaves_details_unchanged() {
        let store = Arc::new(MemoryAlertStore::new());
        let (dispatcher, _broadcaster) =
            dispatcher_with(Arc::new(NullGeofenceLocator), Arc::clone(&store) as _);

        dispatcher.dispatch(alert_at("VH-001", AlertType::Speeding, 0)).await;

        let stored = store.alerts_for("VH-001");
        assert!(stored[0].details.get("geofences").is_none());
    }

    #[tokio::test]
    async fn test_persist_failure_still_broadcasts() {
        let (dispatcher, broadcaster) =
            dispatcher_with(Arc::new(NullGeofenceLocator), Arc::new(FailingStore));
        let mut sub = broadcaster.subscribe_alerts();

        dispatcher.dispatch(alert_at("VH-001", AlertType::Idle, 0)).await;

        assert!(sub.try_recv().is_ok());
    }
}
