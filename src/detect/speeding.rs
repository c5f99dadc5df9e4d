use super::Detector;
use crate::config::DetectionConfig;
use crate::event::{AlertEvent, AlertType, LocationEvent};
use async_trait::async_trait;
use serde_json::json;

/// Stateless speed-limit check: every reading above the limit raises a
/// SPEEDING alert. Repeats from a continuously speeding vehicle are the
/// dispatcher's dedup problem, not this detector's.
pub struct SpeedingDetector {
    max_speed: f64,
}

impl SpeedingDetector {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            max_speed: config.max_speed,
        }
    }
}

#[async_trait]
impl Detector for SpeedingDetector {
    fn role(&self) -> &'static str {
        "speeding"
    }

    async fn on_event(&self, event: &LocationEvent) -> Vec<AlertEvent> {
        let speed = match event.speed {
            Some(s) => s,
            None => return Vec::new(),
        };

        if speed <= self.max_speed {
            return Vec::new();
        }

        vec![AlertEvent::new(
            event.vehicle_id.clone(),
            AlertType::Speeding,
            json!({
                "threshold": self.max_speed,
                "current_speed": speed,
            }),
            Some(event.latitude),
            Some(event.longitude),
            chrono::Utc::now(),
        )]
    }
}
