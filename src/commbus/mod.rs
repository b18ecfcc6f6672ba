//! Communication bus for lifecycle announcements.
//!
//! In-process pub/sub: every published event fans out to all subscribers
//! registered for its event type. The lifecycle machine reaches the bus
//! through [`StateChangePublisher`], its [`NotificationSink`].

use crate::lifecycle::{NotificationSink, StateChange};
use crate::types::{Error, Result, SubscriptionId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// Event type of lifecycle state announcements.
pub const STATE_CHANGED_EVENT: &str = "nat464xlat.state_changed";

// =============================================================================
// Message Types
// =============================================================================

/// Event message for pub/sub pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: String,
    pub payload: Vec<u8>, // JSON-encoded
    pub timestamp_ms: i64,
    pub source: String,
}

impl Event {
    /// Decode the payload of a [`STATE_CHANGED_EVENT`].
    pub fn state_change(&self) -> Result<StateChange> {
        if self.event_type != STATE_CHANGED_EVENT {
            return Err(Error::validation(format!(
                "not a state change event: {}",
                self.event_type
            )));
        }
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

// =============================================================================
// Subscriber Management
// =============================================================================

/// Subscriber handle for receiving events.
#[derive(Debug)]
struct Subscriber {
    id: SubscriptionId,
    tx: mpsc::UnboundedSender<Event>,
}

/// Subscription receipt for managing subscriptions.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub event_types: Vec<String>,
}

/// Statistics about bus usage.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct BusStats {
    pub events_published: u64,
    pub events_delivered: u64,
    pub active_subscribers: usize,
}

// =============================================================================
// CommBus - In-Memory Message Bus
// =============================================================================

/// In-memory fan-out bus.
#[derive(Debug, Default)]
pub struct CommBus {
    /// Event subscribers: event_type -> list of subscribers
    subscribers: RwLock<HashMap<String, Vec<Subscriber>>>,

    stats: RwLock<BusStats>,
}

impl CommBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an event to all subscribers of its type.
    ///
    /// Returns the number of subscribers that received it. Subscribers whose
    /// receiver has been dropped are pruned.
    pub async fn publish(&self, event: Event) -> Result<usize> {
        let mut subscribers = self.subscribers.write().await;

        let mut delivered = 0;
        if let Some(subs) = subscribers.get_mut(&event.event_type) {
            subs.retain(|subscriber| {
                let alive = subscriber.tx.send(event.clone()).is_ok();
                if alive {
                    delivered += 1;
                }
                alive
            });
        }

        let mut stats = self.stats.write().await;
        stats.events_published += 1;
        stats.events_delivered += delivered as u64;
        stats.active_subscribers = subscribers.values().map(|v| v.len()).sum();

        tracing::debug!(
            "Published event type={} to {} subscribers",
            event.event_type,
            delivered
        );

        Ok(delivered)
    }

    /// Subscribe to event types.
    ///
    /// Returns (subscription handle, receiver channel) for receiving events.
    pub async fn subscribe(
        &self,
        event_types: Vec<String>,
    ) -> Result<(Subscription, mpsc::UnboundedReceiver<Event>)> {
        if event_types.is_empty() {
            return Err(Error::validation("subscription needs at least one event type"));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let id = SubscriptionId::new();

        let mut subscribers = self.subscribers.write().await;
        for event_type in &event_types {
            subscribers
                .entry(event_type.clone())
                .or_default()
                .push(Subscriber {
                    id: id.clone(),
                    tx: tx.clone(),
                });
        }

        let mut stats = self.stats.write().await;
        stats.active_subscribers = subscribers.values().map(|v| v.len()).sum();

        tracing::debug!("Subscriber {} registered for events: {:?}", id, event_types);

        Ok((Subscription { id, event_types }, rx))
    }

    /// Unsubscribe from events.
    pub async fn unsubscribe(&self, subscription: &Subscription) -> Result<()> {
        let mut subscribers = self.subscribers.write().await;

        for event_type in &subscription.event_types {
            if let Some(subs) = subscribers.get_mut(event_type) {
                subs.retain(|s| s.id != subscription.id);
            }
        }

        let mut stats = self.stats.write().await;
        stats.active_subscribers = subscribers.values().map(|v| v.len()).sum();

        tracing::debug!("Unsubscribed: {}", subscription.id);

        Ok(())
    }

    /// Get current bus statistics.
    pub async fn get_stats(&self) -> BusStats {
        self.stats.read().await.clone()
    }
}

// =============================================================================
// Lifecycle notification sink
// =============================================================================

/// Publishes lifecycle state changes on a [`CommBus`].
#[derive(Debug, Clone)]
pub struct StateChangePublisher {
    bus: Arc<CommBus>,
    source: String,
}

impl StateChangePublisher {
    pub fn new(bus: Arc<CommBus>, source: impl Into<String>) -> Self {
        Self {
            bus,
            source: source.into(),
        }
    }
}

#[async_trait]
impl NotificationSink for StateChangePublisher {
    async fn notify(&self, change: &StateChange) -> Result<()> {
        let event = Event {
            event_type: STATE_CHANGED_EVENT.to_string(),
            payload: serde_json::to_vec(change)?,
            timestamp_ms: change.timestamp_ms,
            source: self.source.clone(),
        };
        let delivered = self.bus.publish(event).await?;
        tracing::info!(
            state = %change.state,
            upstream = %change.upstream_interface,
            clat = %change.clat_interface,
            delivered,
            "state change published"
        );
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::StateLabel;
    use chrono::Utc;

    fn event(event_type: &str) -> Event {
        Event {
            event_type: event_type.to_string(),
            payload: b"{}".to_vec(),
            timestamp_ms: Utc::now().timestamp_millis(),
            source: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = CommBus::new();

        let delivered = bus.publish(event("nobody.listens")).await.unwrap();
        assert_eq!(delivered, 0);
        assert_eq!(bus.get_stats().await.events_published, 1);
    }

    #[tokio::test]
    async fn test_fan_out_to_all_subscribers() {
        let bus = CommBus::new();

        let (_s1, mut rx1) = bus.subscribe(vec!["event.a".to_string()]).await.unwrap();
        let (_s2, mut rx2) = bus.subscribe(vec!["event.a".to_string()]).await.unwrap();
        let (_s3, mut rx3) = bus.subscribe(vec!["event.b".to_string()]).await.unwrap();

        assert_eq!(bus.publish(event("event.a")).await.unwrap(), 2);

        assert_eq!(rx1.recv().await.unwrap().event_type, "event.a");
        assert_eq!(rx2.recv().await.unwrap().event_type, "event.a");
        assert!(rx3.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = CommBus::new();

        let (sub, _rx) = bus.subscribe(vec!["event.a".to_string()]).await.unwrap();
        bus.unsubscribe(&sub).await.unwrap();

        assert_eq!(bus.publish(event("event.a")).await.unwrap(), 0);
        assert_eq!(bus.get_stats().await.active_subscribers, 0);
    }

    #[tokio::test]
    async fn test_dropped_receivers_are_pruned() {
        let bus = CommBus::new();

        let (_sub, rx) = bus.subscribe(vec!["event.a".to_string()]).await.unwrap();
        assert_eq!(bus.get_stats().await.active_subscribers, 1);
        drop(rx);

        assert_eq!(bus.publish(event("event.a")).await.unwrap(), 0);
        assert_eq!(bus.get_stats().await.active_subscribers, 0);
    }

    #[tokio::test]
    async fn test_subscribe_requires_event_types() {
        let bus = CommBus::new();
        assert!(bus.subscribe(Vec::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_publisher_emits_state_change() {
        let bus = Arc::new(CommBus::new());
        let (_sub, mut rx) = bus
            .subscribe(vec![STATE_CHANGED_EVENT.to_string()])
            .await
            .unwrap();
        let publisher = StateChangePublisher::new(bus.clone(), "464xlat");

        let change = StateChange::new(
            StateLabel::Stopping,
            "rmnet0".parse().unwrap(),
            "clat".parse().unwrap(),
        );
        publisher.notify(&change).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.source, "464xlat");
        assert_eq!(received.state_change().unwrap(), change);
    }

    #[test]
    fn test_state_change_rejects_other_events() {
        assert!(event("event.a").state_change().is_err());
    }
}
