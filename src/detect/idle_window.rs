use super::Detector;
use crate::config::DetectionConfig;
use crate::event::{AlertEvent, AlertType, LocationEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

/// A window with fewer speed readings than this never alerts, so a
/// single stray sample cannot flag a vehicle as idle.
const MIN_WINDOW_SAMPLES: u32 = 3;

#[derive(Debug, Default)]
struct WindowAggregate {
    speed_sum: f64,
    samples: u32,
    last_latitude: f64,
    last_longitude: f64,
}

/// Per-vehicle window state. Keys are window start times in epoch
/// millis, aligned to the window width.
struct VehicleWindows {
    /// Highest event time observed (event-time watermark)
    watermark_ms: i64,
    /// Window starts below this are finalized; later arrivals for them
    /// are dropped
    finalized_before_ms: i64,
    open: BTreeMap<i64, WindowAggregate>,
}

impl VehicleWindows {
    fn new() -> Self {
        Self {
            watermark_ms: i64::MIN,
            finalized_before_ms: i64::MIN,
            open: BTreeMap::new(),
        }
    }
}

/// Tumbling-window idle detection: within each per-vehicle window, if
/// enough speed readings arrive and their mean is below the idle
/// threshold, the window produces one IDLE alert when it closes.
///
/// Windows close when the vehicle's own event-time watermark passes the
/// window end plus grace, or, for vehicles that went quiet, when the
/// wall-clock sweep does. State is ephemeral and rebuilt from the
/// stream.
pub struct WindowedIdleDetector {
    windows: DashMap<String, VehicleWindows>,
    width_ms: i64,
    grace_ms: i64,
    threshold: f64,
    window_minutes: i64,
}

impl WindowedIdleDetector {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            windows: DashMap::new(),
            width_ms: config.idle_window_minutes * 60_000,
            grace_ms: config.idle_grace_seconds * 1_000,
            threshold: config.idle_speed_threshold,
            window_minutes: config.idle_window_minutes,
        }
    }

    fn observe(&self, event: &LocationEvent) -> Vec<AlertEvent> {
        // Only speed-bearing readings count as samples
        let speed = match event.speed {
            Some(s) => s,
            None => return Vec::new(),
        };

        let ts_ms = event.event_time().timestamp_millis();
        let start_ms = ts_ms.div_euclid(self.width_ms) * self.width_ms;

        let mut entry = self
            .windows
            .entry(event.vehicle_id.clone())
            .or_insert_with(VehicleWindows::new);

        if start_ms < entry.finalized_before_ms {
            debug!(
                vehicle_id = %event.vehicle_id,
                window_start_ms = start_ms,
                "Event older than finalized horizon, dropping"
            );
            return Vec::new();
        }

        let agg = entry.open.entry(start_ms).or_default();
        agg.speed_sum += speed;
        agg.samples += 1;
        agg.last_latitude = event.latitude;
        agg.last_longitude = event.longitude;

        if ts_ms > entry.watermark_ms {
            entry.watermark_ms = ts_ms;
        }

        // Close every window the watermark has passed beyond grace
        let close_before = entry
            .watermark_ms
            .saturating_sub(self.width_ms + self.grace_ms);
        let vehicle_id = event.vehicle_id.clone();
        self.close_windows(&vehicle_id, &mut entry, close_before)
    }

    /// Finalizes all windows of one vehicle starting before `close_before`
    fn close_windows(
        &self,
        vehicle_id: &str,
        entry: &mut VehicleWindows,
        close_before: i64,
    ) -> Vec<AlertEvent> {
        let still_open = entry.open.split_off(&close_before);
        let closed = std::mem::replace(&mut entry.open, still_open);

        let mut alerts = Vec::new();
        for (start_ms, agg) in closed {
            entry.finalized_before_ms = entry.finalized_before_ms.max(start_ms + self.width_ms);
            if let Some(alert) = self.finalize(vehicle_id, agg) {
                alerts.push(alert);
            }
        }
        alerts
    }

    fn finalize(&self, vehicle_id: &str, agg: WindowAggregate) -> Option<AlertEvent> {
        if agg.samples < MIN_WINDOW_SAMPLES {
            return None;
        }

        let avg_speed = agg.speed_sum / agg.samples as f64;
        if avg_speed >= self.threshold {
            return None;
        }

        Some(AlertEvent::new(
            vehicle_id,
            AlertType::Idle,
            json!({
                "avg_speed": avg_speed,
                "threshold": self.threshold,
                "window_minutes": self.window_minutes,
                "samples": agg.samples,
            }),
            Some(agg.last_latitude),
            Some(agg.last_longitude),
            Utc::now(),
        ))
    }
}

#[async_trait]
impl Detector for WindowedIdleDetector {
    fn role(&self) -> &'static str {
        "idle-window"
    }

    async fn on_event(&self, event: &LocationEvent) -> Vec<AlertEvent> {
        self.observe(event)
    }

    /// Closes windows whose end plus grace is behind the wall clock, so
    /// a vehicle that stopped reporting still gets its last window
    /// evaluated. Vehicles with no remaining windows are forgotten.
    fn sweep(&self, now: DateTime<Utc>) -> Vec<AlertEvent> {
        let close_before = now
            .timestamp_millis()
            .saturating_sub(self.width_ms + self.grace_ms);

        let mut alerts = Vec::new();
        let mut idle_vehicles = Vec::new();

        for mut entry in self.windows.iter_mut() {
            let vehicle_id = entry.key().clone();
            alerts.extend(self.close_windows(&vehicle_id, &mut entry, close_before));
            if entry.open.is_empty() {
                idle_vehicles.push(vehicle_id);
            }
        }

        for vehicle_id in idle_vehicles {
            self.windows.remove_if(&vehicle_id, |_, v| v.open.is_empty());
        }

        alerts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    // Aligned to a 3-minute window boundary
    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    fn ev(secs_from_base: i64, speed: f64) -> LocationEvent {
        LocationEvent {
            event_id: Some("test".to_string()),
            vehicle_id: "VH-001".to_string(),
            latitude: 37.0 + secs_from_base as f64 * 1e-6,
            longitude: -122.0,
            speed: Some(speed),
            heading: None,
            timestamp: Some(base() + Duration::seconds(secs_from_base)),
        }
    }

    fn detector() -> WindowedIdleDetector {
        WindowedIdleDetector::new(&DetectionConfig::default()) // 3 min window, 30 s grace, 5.0 km/h
    }

    #[test]
    fn test_three_slow_samples_alert_with_mean_speed() {
        let d = detector();

        assert!(d.observe(&ev(0, 2.0)).is_empty());
        assert!(d.observe(&ev(60, 3.0)).is_empty());
        assert!(d.observe(&ev(120, 4.0)).is_empty());

        // Watermark passes window end (180 s) + grace (30 s)
        let alerts = d.observe(&ev(211, 50.0));
        assert_eq!(alerts.len(), 1);

        let alert = &alerts[0];
        assert_eq!(alert.alert_type, AlertType::Idle);
        assert_eq!(alert.details["avg_speed"], 3.0);
        assert_eq!(alert.details["samples"], 3);
        assert_eq!(alert.details["threshold"], 5.0);
        assert_eq!(alert.details["window_minutes"], 3);
        // Last position of the window, not of the closing event
        assert_eq!(alert.longitude, Some(-122.0));
    }

    #[test]
    fn test_two_samples_never_alert() {
        let d = detector();

        d.observe(&ev(0, 1.0));
        d.observe(&ev(60, 1.0));

        assert!(d.observe(&ev(211, 1.0)).is_empty());
        // Sweep far in the future closes everything else silently too
        let alerts = d.sweep(base() + Duration::seconds(1000));
        // The closing event's own window had a single sample
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_fast_window_closes_silently() {
        let d = detector();

        d.observe(&ev(0, 40.0));
        d.observe(&ev(60, 45.0));
        d.observe(&ev(120, 50.0));

        assert!(d.observe(&ev(211, 50.0)).is_empty());
    }

    #[test]
    fn test_average_at_threshold_does_not_alert() {
        let d = detector();

        d.observe(&ev(0, 5.0));
        d.observe(&ev(60, 5.0));
        d.observe(&ev(120, 5.0));

        // Mean is exactly the threshold; idle means strictly below
        assert!(d.observe(&ev(211, 5.0)).is_empty());
    }

    #[test]
    fn test_late_event_within_grace_is_admitted() {
        let d = detector();

        d.observe(&ev(30, 2.0));
        d.observe(&ev(60, 2.0));
        // Watermark at 190 s: past window end, still within grace
        assert!(d.observe(&ev(190, 80.0)).is_empty());

        // Late event lands back in the first window, making it qualify
        assert!(d.observe(&ev(120, 2.0)).is_empty());

        let alerts = d.observe(&ev(220, 80.0));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].details["samples"], 3);
        assert_eq!(alerts[0].details["avg_speed"], 2.0);
    }

    #[test]
    fn test_event_older_than_finalized_horizon_is_dropped() {
        let d = detector();

        d.observe(&ev(0, 2.0));
        d.observe(&ev(60, 2.0));
        d.observe(&ev(120, 2.0));
        let alerts = d.observe(&ev(211, 50.0));
        assert_eq!(alerts.len(), 1);

        // Straggler for the closed window: no state, no second alert
        assert!(d.observe(&ev(90, 2.0)).is_empty());
        let entry = d.windows.get("VH-001").unwrap();
        assert!(!entry.open.contains_key(&base().timestamp_millis()));
    }

    #[test]
    fn test_sweep_closes_window_for_quiet_vehicle() {
        let d = detector();

        d.observe(&ev(0, 1.0));
        d.observe(&ev(30, 2.0));
        d.observe(&ev(60, 3.0));

        // No further events; before end + grace the sweep holds off
        assert!(d.sweep(base() + Duration::seconds(200)).is_empty());

        let alerts = d.sweep(base() + Duration::seconds(211));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].details["avg_speed"], 2.0);

        // Vehicle with no open windows is forgotten
        assert!(d.windows.get("VH-001").is_none());
    }

    #[test]
    fn test_events_without_speed_are_ignored() {
        let d = detector();

        let mut no_speed = ev(0, 0.0);
        no_speed.speed = None;
        assert!(d.observe(&no_speed).is_empty());
        assert!(d.windows.get("VH-001").is_none());
    }

    #[test]
    fn test_vehicles_partition_state() {
        let d = detector();

        d.observe(&ev(0, 2.0));
        d.observe(&ev(60, 2.0));
        d.observe(&ev(120, 2.0));

        let mut other = ev(211, 50.0);
        other.vehicle_id = "VH-002".to_string();
        // Another vehicle's watermark must not close VH-001's window
        assert!(d.observe(&other).is_empty());

        let alerts = d.observe(&ev(211, 50.0));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].vehicle_id, "VH-001");
    }
}
