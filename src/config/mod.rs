use serde::Deserialize;

pub use crate::nats::NatsConfig;

/// Complete fleetwatch configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub nats: NatsConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub geofence: GeofenceConfig,
    #[serde(default)]
    pub rollup: RollupConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// Which idle detector(s) run. Both alert shapes are emitted under
/// `both`; the dispatcher's dedup window collapses the overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdleMode {
    Windowed,
    Tracker,
    Both,
}

impl IdleMode {
    pub fn windowed_enabled(&self) -> bool {
        matches!(self, IdleMode::Windowed | IdleMode::Both)
    }

    pub fn tracker_enabled(&self) -> bool {
        matches!(self, IdleMode::Tracker | IdleMode::Both)
    }
}

/// Detector thresholds and window geometry
#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "default_idle_mode")]
    pub idle_mode: IdleMode,
    /// Tumbling window width for the windowed idle detector (minutes)
    #[serde(default = "default_idle_window_minutes")]
    pub idle_window_minutes: i64,
    /// Late events are admitted until window end + grace (seconds)
    #[serde(default = "default_idle_grace_seconds")]
    pub idle_grace_seconds: i64,
    /// Speeds at or below this count as idle (km/h)
    #[serde(default = "default_idle_speed_threshold")]
    pub idle_speed_threshold: f64,
    /// Continuous tracker alerts after this long stationary (minutes)
    #[serde(default = "default_idle_duration_minutes")]
    pub idle_duration_minutes: i64,
    /// Speeds above this raise a SPEEDING alert (km/h)
    #[serde(default = "default_max_speed")]
    pub max_speed: f64,
}

fn default_idle_mode() -> IdleMode {
    IdleMode::Both
}

fn default_idle_window_minutes() -> i64 {
    3
}

fn default_idle_grace_seconds() -> i64 {
    30
}

fn default_idle_speed_threshold() -> f64 {
    5.0
}

fn default_idle_duration_minutes() -> i64 {
    3
}

fn default_max_speed() -> f64 {
    90.0
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            idle_mode: default_idle_mode(),
            idle_window_minutes: default_idle_window_minutes(),
            idle_grace_seconds: default_idle_grace_seconds(),
            idle_speed_threshold: default_idle_speed_threshold(),
            idle_duration_minutes: default_idle_duration_minutes(),
            max_speed: default_max_speed(),
        }
    }
}

/// Alert deduplication at the dispatcher
#[derive(Debug, Clone, Deserialize)]
pub struct DedupConfig {
    /// Suppress repeats of (vehicle, alert type) within this window (seconds)
    #[serde(default = "default_dedup_window_seconds")]
    pub window_seconds: i64,
    /// How often expired dedup entries are compacted (seconds)
    #[serde(default = "default_compact_interval_seconds")]
    pub compact_interval_seconds: u64,
}

fn default_dedup_window_seconds() -> i64 {
    60
}

fn default_compact_interval_seconds() -> u64 {
    300
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window_seconds: default_dedup_window_seconds(),
            compact_interval_seconds: default_compact_interval_seconds(),
        }
    }
}

/// Live broadcast fan-out
#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastConfig {
    /// Per-subscriber alert queue capacity
    #[serde(default = "default_alert_buffer")]
    pub alert_buffer: usize,
    /// Per-subscriber vehicle update queue capacity
    #[serde(default = "default_vehicle_buffer")]
    pub vehicle_buffer: usize,
    /// Heartbeat cadence on SSE streams (seconds)
    #[serde(default = "default_heartbeat_seconds")]
    pub heartbeat_seconds: u64,
    /// Client reconnect hint sent with SSE events (milliseconds)
    #[serde(default = "default_retry_ms")]
    pub retry_ms: u64,
}

fn default_alert_buffer() -> usize {
    1024
}

fn default_vehicle_buffer() -> usize {
    256
}

fn default_heartbeat_seconds() -> u64 {
    15
}

fn default_retry_ms() -> u64 {
    3000
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            alert_buffer: default_alert_buffer(),
            vehicle_buffer: default_vehicle_buffer(),
            heartbeat_seconds: default_heartbeat_seconds(),
            retry_ms: default_retry_ms(),
        }
    }
}

/// Geofence lookup collaborator
#[derive(Debug, Clone, Deserialize)]
pub struct GeofenceConfig {
    /// When false, membership tracking and enrichment see no geofences
    #[serde(default = "default_geofence_enabled")]
    pub enabled: bool,
    #[serde(default = "default_geofence_base_url")]
    pub base_url: String,
    /// Lookup timeout (milliseconds); failures degrade to an empty set
    #[serde(default = "default_geofence_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_geofence_enabled() -> bool {
    true
}

fn default_geofence_base_url() -> String {
    "http://localhost:8081".to_string()
}

fn default_geofence_timeout_ms() -> u64 {
    2000
}

impl Default for GeofenceConfig {
    fn default() -> Self {
        Self {
            enabled: default_geofence_enabled(),
            base_url: default_geofence_base_url(),
            timeout_ms: default_geofence_timeout_ms(),
        }
    }
}

/// Periodic stats aggregation
#[derive(Debug, Clone, Deserialize)]
pub struct RollupConfig {
    #[serde(default = "default_rollup_enabled")]
    pub enabled: bool,
    #[serde(default = "default_rollup_interval_minutes")]
    pub interval_minutes: u64,
}

fn default_rollup_enabled() -> bool {
    true
}

fn default_rollup_interval_minutes() -> u64 {
    5
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            enabled: default_rollup_enabled(),
            interval_minutes: default_rollup_interval_minutes(),
        }
    }
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum events accepted in one batch ingestion call
    #[serde(default = "default_max_batch_events")]
    pub max_batch_events: usize,
}

fn default_bind() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_max_batch_events() -> usize {
    1000
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_batch_events: default_max_batch_events(),
        }
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            nats: NatsConfig::default(),
            detection: DetectionConfig::default(),
            dedup: DedupConfig::default(),
            broadcast: BroadcastConfig::default(),
            geofence: GeofenceConfig::default(),
            rollup: RollupConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<FleetConfig, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: FleetConfig = toml::from_str(&contents)?;
    Ok(config)
}
