// NATS JetStream integration: pipeline streams, publishers, consumers

mod client;
mod consumer;
mod publisher;

pub use client::{
    alert_subject, gps_subject, NatsClient, NatsConfig, ALERT_STREAM, ALERT_SUBJECTS,
    DLQ_GPS_SUBJECT, DLQ_STREAM, DLQ_SUBJECTS, GPS_STREAM, GPS_SUBJECTS,
};
pub use consumer::tail_consumer;
pub use publisher::{AlertPublisher, GpsPublisher, LocationPublisher};
