use crate::event::AlertEvent;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

/// Daily per-vehicle alert roll-up
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyVehicleStats {
    pub vehicle_id: String,
    pub date: NaiveDate,
    pub alert_count: u64,
    /// Counts keyed by alert type wire name (e.g. "SPEEDING")
    pub by_type: HashMap<String, u64>,
}

/// Persistence boundary for alerts and their roll-ups.
///
/// The pipeline treats both operations as non-fatal: a failed save is
/// logged and the alert still reaches live subscribers, a failed
/// aggregation is retried on the next rollup tick.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Persist one alert, returning its stored id
    async fn save_alert(&self, alert: &AlertEvent) -> Result<Uuid>;

    /// Recompute daily per-vehicle stats for the day containing `now`.
    /// Returns the number of vehicles aggregated.
    async fn aggregate_daily_stats(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// In-memory store. Stands in for the relational collaborator in
/// single-process deployments and tests.
pub struct MemoryAlertStore {
    alerts: DashMap<Uuid, AlertEvent>,
    daily_stats: DashMap<(String, NaiveDate), DailyVehicleStats>,
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self {
            alerts: DashMap::new(),
            daily_stats: DashMap::new(),
        }
    }

    pub fn alert_count(&self) -> usize {
        self.alerts.len()
    }

    pub fn alerts_for(&self, vehicle_id: &str) -> Vec<AlertEvent> {
        self.alerts
            .iter()
            .filter(|entry| entry.value().vehicle_id == vehicle_id)
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn stats_for(&self, vehicle_id: &str, date: NaiveDate) -> Option<DailyVehicleStats> {
        self.daily_stats
            .get(&(vehicle_id.to_string(), date))
            .map(|entry| entry.value().clone())
    }
}

impl Default for MemoryAlertStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn save_alert(&self, alert: &AlertEvent) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.alerts.insert(id, alert.clone());
        Ok(id)
    }

    async fn aggregate_daily_stats(&self, now: DateTime<Utc>) -> Result<usize> {
        let date = now.date_naive();
        let mut per_vehicle: HashMap<String, DailyVehicleStats> = HashMap::new();

        for entry in self.alerts.iter() {
            let alert = entry.value();
            if alert.timestamp.date_naive() != date {
                continue;
            }

            let stats = per_vehicle
                .entry(alert.vehicle_id.clone())
                .or_insert_with(|| DailyVehicleStats {
                    vehicle_id: alert.vehicle_id.clone(),
                    date,
                    alert_count: 0,
                    by_type: HashMap::new(),
                });
            stats.alert_count += 1;
            *stats
                .by_type
                .entry(alert.alert_type.as_str().to_string())
                .or_insert(0) += 1;
        }

        let aggregated = per_vehicle.len();

        // Replace rather than merge, so reruns within the day stay exact
        for (vehicle_id, stats) in per_vehicle {
            self.daily_stats.insert((vehicle_id, date), stats);
        }

        Ok(aggregated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AlertType;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn alert_at(vehicle: &str, alert_type: AlertType, ts: DateTime<Utc>) -> AlertEvent {
        AlertEvent::new(vehicle, alert_type, json!({}), Some(1.0), Some(2.0), ts)
    }

    #[tokio::test]
    async fn test_save_alert_stores_a_copy() {
        let store = MemoryAlertStore::new();
        let ts = Utc::now();

        let id = store
            .save_alert(&alert_at("VH-001", AlertType::Idle, ts))
            .await
            .unwrap();

        assert_eq!(store.alert_count(), 1);
        assert!(store.alerts.get(&id).is_some());
    }

    #[tokio::test]
    async fn test_daily_stats_counts_by_type() {
        let store = MemoryAlertStore::new();
        let now = Utc.with_ymd_and_hms(2026, 4, 10, 12, 0, 0).unwrap();

        store.save_alert(&alert_at("VH-001", AlertType::Speeding, now)).await.unwrap();
        store.save_alert(&alert_at("VH-001", AlertType::Speeding, now)).await.unwrap();
        store.save_alert(&alert_at("VH-001", AlertType::Idle, now)).await.unwrap();
        store.save_alert(&alert_at("VH-002", AlertType::GeofenceEnter, now)).await.unwrap();

        let aggregated = store.aggregate_daily_stats(now).await.unwrap();
        assert_eq!(aggregated, 2);

        let stats = store.stats_for("VH-001", now.date_naive()).unwrap();
        assert_eq!(stats.alert_count, 3);
        assert_eq!(stats.by_type["SPEEDING"], 2);
        assert_eq!(stats.by_type["IDLE"], 1);

        let stats2 = store.stats_for("VH-002", now.date_naive()).unwrap();
        assert_eq!(stats2.alert_count, 1);
        assert_eq!(stats2.by_type["GEOFENCE_ENTER"], 1);
    }

    #[tokio::test]
    async fn test_daily_stats_ignores_other_days() {
        let store = MemoryAlertStore::new();
        let now = Utc.with_ymd_and_hms(2026, 4, 10, 12, 0, 0).unwrap();
        let yesterday = now - Duration::days(1);

        store.save_alert(&alert_at("VH-001", AlertType::Idle, yesterday)).await.unwrap();
        store.save_alert(&alert_at("VH-001", AlertType::Idle, now)).await.unwrap();

        store.aggregate_daily_stats(now).await.unwrap();

        let stats = store.stats_for("VH-001", now.date_naive()).unwrap();
        assert_eq!(stats.alert_count, 1);
        assert!(store.stats_for("VH-001", yesterday.date_naive()).is_none());
    }

    #[tokio::test]
    async fn test_rerun_replaces_stats() {
        let store = MemoryAlertStore::new();
        let now = Utc.with_ymd_and_hms(2026, 4, 10, 12, 0, 0).unwrap();

        store.save_alert(&alert_at("VH-001", AlertType::Idle, now)).await.unwrap();
        store.aggregate_daily_stats(now).await.unwrap();

        store.save_alert(&alert_at("VH-001", AlertType::Idle, now)).await.unwrap();
        store.aggregate_daily_stats(now).await.unwrap();

        // Exact recount, not doubled by the second run
        let stats = store.stats_for("VH-001", now.date_naive()).unwrap();
        assert_eq!(stats.alert_count, 2);
    }
}
