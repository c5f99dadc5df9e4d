use crate::config::BroadcastConfig;
use crate::event::AlertEvent;
use crate::status::VehicleStatus;
use dashmap::DashMap;
use futures::Stream;
use serde::Serialize;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tracing::debug;
use uuid::Uuid;

/// One fan-out lane: a registry of per-subscriber bounded queues.
///
/// Publishing try-sends to every queue. A full queue keeps what the
/// subscriber already has and loses the new item (slow consumers see a
/// gap, fast consumers are unaffected), and the loss is counted.
struct Fanout<T> {
    capacity: usize,
    subscribers: Arc<DashMap<Uuid, mpsc::Sender<T>>>,
    dropped: Arc<AtomicU64>,
}

impl<T: Clone> Fanout<T> {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            subscribers: Arc::new(DashMap::new()),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = Uuid::new_v4();
        self.subscribers.insert(id, tx);

        debug!(subscriber = %id, total = self.subscribers.len(), "Subscriber attached");

        Subscription {
            id,
            rx,
            registry: Arc::clone(&self.subscribers),
        }
    }

    /// Non-blocking by construction: try_send either enqueues or fails
    /// immediately.
    fn publish(&self, item: &T) {
        for entry in self.subscribers.iter() {
            match entry.value().try_send(item.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(subscriber = %entry.key(), "Subscriber queue full, dropping item");
                }
                // Receiver already gone; its Drop removes the entry
                Err(TrySendError::Closed(_)) => {}
            }
        }
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// A live feed handle. Dropping it releases the registry slot
/// immediately, so disconnected consumers stop costing queue space.
pub struct Subscription<T> {
    id: Uuid,
    rx: mpsc::Receiver<T>,
    registry: Arc<DashMap<Uuid, mpsc::Sender<T>>>,
}

impl<T> Subscription<T> {
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        self.rx.try_recv()
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
        debug!(subscriber = %self.id, "Subscriber detached");
    }
}

/// Fan-out for live consumers: one lane for alerts, one for vehicle
/// position updates. Publishers never block and never fail.
pub struct LiveBroadcaster {
    alerts: Fanout<AlertEvent>,
    vehicles: Fanout<VehicleStatus>,
}

impl LiveBroadcaster {
    pub fn new(config: &BroadcastConfig) -> Self {
        Self {
            alerts: Fanout::new(config.alert_buffer),
            vehicles: Fanout::new(config.vehicle_buffer),
        }
    }

    pub fn publish_alert(&self, alert: &AlertEvent) {
        self.alerts.publish(alert);
    }

    pub fn publish_vehicle(&self, status: &VehicleStatus) {
        self.vehicles.publish(status);
    }

    pub fn subscribe_alerts(&self) -> Subscription<AlertEvent> {
        self.alerts.subscribe()
    }

    pub fn subscribe_vehicles(&self) -> Subscription<VehicleStatus> {
        self.vehicles.subscribe()
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            alert_subscribers: self.alerts.subscriber_count(),
            vehicle_subscribers: self.vehicles.subscriber_count(),
            dropped_alerts: self.alerts.dropped_count(),
            dropped_vehicle_updates: self.vehicles.dropped_count(),
        }
    }
}

/// Point-in-time view of the fan-out, served by the connections endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSnapshot {
    pub alert_subscribers: usize,
    pub vehicle_subscribers: usize,
    pub dropped_alerts: u64,
    pub dropped_vehicle_updates: u64,
}
