use super::Detector;
use crate::config::DetectionConfig;
use crate::event::{AlertEvent, AlertType, LocationEvent};
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use dashmap::DashMap;
use serde_json::json;

/// One contiguous stationary stretch for a vehicle
struct IdleEpisode {
    first_idle_time: DateTime<Utc>,
    alerted: bool,
}

/// Continuous idle tracking: a vehicle that stays at or below the idle
/// speed threshold for the configured duration raises one IDLE alert
/// for that episode. Any reading above the threshold ends the episode
/// and re-arms the vehicle.
pub struct IdleStateTracker {
    episodes: DashMap<String, IdleEpisode>,
    threshold: f64,
    idle_duration: Duration,
}

impl IdleStateTracker {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            episodes: DashMap::new(),
            threshold: config.idle_speed_threshold,
            idle_duration: Duration::minutes(config.idle_duration_minutes),
        }
    }

    fn observe(&self, event: &LocationEvent) -> Vec<AlertEvent> {
        // A reading without speed says nothing about motion
        let speed = match event.speed {
            Some(s) => s,
            None => return Vec::new(),
        };

        if speed > self.threshold {
            // Moving again: close the episode so the next stop re-arms
            self.episodes.remove(&event.vehicle_id);
            return Vec::new();
        }

        let ts = event.event_time();
        let mut episode = self
            .episodes
            .entry(event.vehicle_id.clone())
            .or_insert_with(|| IdleEpisode {
                first_idle_time: ts,
                alerted: false,
            });

        if episode.alerted {
            return Vec::new();
        }

        let elapsed = ts.signed_duration_since(episode.first_idle_time);
        if elapsed < self.idle_duration {
            return Vec::new();
        }

        episode.alerted = true;
        vec![AlertEvent::new(
            event.vehicle_id.clone(),
            AlertType::Idle,
            json!({
                "idle_seconds": elapsed.num_seconds(),
                "first_idle_time": episode
                    .first_idle_time
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
                "current_speed": speed,
                "threshold": self.threshold,
            }),
            Some(event.latitude),
            Some(event.longitude),
            Utc::now(),
        )]
    }
}

#[async_trait]
impl Detector for IdleStateTracker {
    fn role(&self) -> &'static str {
        "idle-tracker"
    }

    async fn on_event(&self, event: &LocationEvent) -> Vec<AlertEvent> {
        self.observe(event)
    }
}
