// Event model and validation
pub mod event;

// Configuration
pub mod config;

// NATS client integration
pub mod nats;

// Location intake: status cache, live updates, dead-lettering
pub mod intake;

// Stream detectors
pub mod detect;

// Alert dedup, enrichment, persistence, fan-out
pub mod dispatch;

// Dead-letter routing
pub mod dlq;

// Geofence lookup collaborator
pub mod geofence;

// Live broadcast fan-out
pub mod broadcast;

// Last-known vehicle status
pub mod status;

// Alert persistence and daily stats
pub mod persist;

// Periodic stats rollup
pub mod rollup;

// HTTP API
pub mod api;
