//! Event bus — data-change notifications for subscribed dashboards
//!
//! A tokio actor owns the subscriber registry; operations arrive over an
//! mpsc channel so registry mutations are serialized. Subscribers are keyed
//! by (user_id, dashboard_id) and each owns a bounded FIFO queue; when a
//! subscriber falls behind, messages addressed to it are dropped rather
//! than blocking publishers. Ordering is per-subscriber only.

use bson::oid::ObjectId;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    DataCollectionUpdated,
    DataCollectionCreated,
    JoinCompleted,
}

/// Operation carried by a data-collection-change event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DcOperation {
    Added,
    Updated,
    Deleted,
}

/// Wire envelope (JSON over the websocket transport).
///
/// Entity ids travel as 24-char lowercase hex, not extended JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_type: EventKind,
    /// ISO 8601
    pub timestamp: String,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_oid_hex",
        deserialize_with = "deserialize_oid_hex",
        default
    )]
    pub dashboard_id: Option<ObjectId>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_oid_hex",
        deserialize_with = "deserialize_oid_hex",
        default
    )]
    pub data_collection_id: Option<ObjectId>,
    pub payload: serde_json::Value,
}

fn serialize_oid_hex<S>(value: &Option<ObjectId>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match value {
        Some(oid) => serializer.serialize_some(&oid.to_hex()),
        None => serializer.serialize_none(),
    }
}

fn deserialize_oid_hex<'de, D>(deserializer: D) -> Result<Option<ObjectId>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    value
        .map(|hex| ObjectId::parse_str(&hex).map_err(serde::de::Error::custom))
        .transpose()
}

impl EventEnvelope {
    pub fn new(event_type: EventKind, payload: serde_json::Value) -> Self {
        Self {
            event_type,
            timestamp: Utc::now().to_rfc3339(),
            dashboard_id: None,
            data_collection_id: None,
            payload,
        }
    }

    pub fn for_dashboard(mut self, dashboard_id: ObjectId) -> Self {
        self.dashboard_id = Some(dashboard_id);
        self
    }

    pub fn for_data_collection(mut self, dc_id: ObjectId) -> Self {
        self.data_collection_id = Some(dc_id);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriberKey {
    pub user_id: ObjectId,
    pub dashboard_id: ObjectId,
}

enum BusMsg {
    Subscribe {
        key: SubscriberKey,
        reply: oneshot::Sender<mpsc::Receiver<EventEnvelope>>,
    },
    Unsubscribe {
        key: SubscriberKey,
    },
    Publish {
        envelope: EventEnvelope,
    },
    SubscriberCount {
        reply: oneshot::Sender<usize>,
    },
}

/// Event bus actor — owns the subscriber registry
pub struct EventBus {
    rx: mpsc::Receiver<BusMsg>,
    subscribers: std::collections::HashMap<SubscriberKey, mpsc::Sender<EventEnvelope>>,
    queue_depth: usize,
    dropped: u64,
}

impl EventBus {
    /// Spawn the bus and return a cloneable handle
    pub fn spawn(queue_depth: usize) -> EventBusHandle {
        let (tx, rx) = mpsc::channel(256);
        let bus = Self {
            rx,
            subscribers: std::collections::HashMap::new(),
            queue_depth,
            dropped: 0,
        };
        tokio::spawn(bus.run());
        info!("EventBus spawned");
        EventBusHandle { tx }
    }

    async fn run(mut self) {
        while let Some(msg) = self.rx.recv().await {
            match msg {
                BusMsg::Subscribe { key, reply } => {
                    let (tx, rx) = mpsc::channel(self.queue_depth);
                    debug!(user = %key.user_id, dashboard = %key.dashboard_id, "Subscriber registered");
                    self.subscribers.insert(key, tx);
                    let _ = reply.send(rx);
                }
                BusMsg::Unsubscribe { key } => {
                    self.subscribers.remove(&key);
                }
                BusMsg::Publish { envelope } => self.dispatch(envelope),
                BusMsg::SubscriberCount { reply } => {
                    let _ = reply.send(self.subscribers.len());
                }
            }
        }
        info!("EventBus stopped");
    }

    /// Route an envelope: dashboard-scoped events go only to that
    /// dashboard's subscribers; unscoped events go to everyone.
    fn dispatch(&mut self, envelope: EventEnvelope) {
        let mut stale = Vec::new();
        for (key, tx) in &self.subscribers {
            if let Some(dashboard_id) = &envelope.dashboard_id {
                if &key.dashboard_id != dashboard_id {
                    continue;
                }
            }
            match tx.try_send(envelope.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.dropped += 1;
                    warn!(
                        user = %key.user_id,
                        dashboard = %key.dashboard_id,
                        dropped_total = self.dropped,
                        "Subscriber queue full, event dropped"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    stale.push(key.clone());
                }
            }
        }
        for key in stale {
            debug!(dashboard = %key.dashboard_id, "Removing disconnected subscriber");
            self.subscribers.remove(&key);
        }
    }
}

/// Thread-safe handle to the event bus
#[derive(Clone)]
pub struct EventBusHandle {
    tx: mpsc::Sender<BusMsg>,
}

impl EventBusHandle {
    /// Register a subscriber and receive its event stream
    pub async fn subscribe(
        &self,
        user_id: ObjectId,
        dashboard_id: ObjectId,
    ) -> Option<mpsc::Receiver<EventEnvelope>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(BusMsg::Subscribe {
                key: SubscriberKey {
                    user_id,
                    dashboard_id,
                },
                reply,
            })
            .await
            .ok()?;
        rx.await.ok()
    }

    pub async fn unsubscribe(&self, user_id: ObjectId, dashboard_id: ObjectId) {
        let _ = self
            .tx
            .send(BusMsg::Unsubscribe {
                key: SubscriberKey {
                    user_id,
                    dashboard_id,
                },
            })
            .await;
    }

    /// Publish an envelope; never blocks on slow subscribers
    pub async fn publish(&self, envelope: EventEnvelope) {
        let _ = self.tx.send(BusMsg::Publish { envelope }).await;
    }

    /// Convenience: data_collection_updated with the standard payload
    pub async fn publish_dc_updated(
        &self,
        dc_id: ObjectId,
        data_collection_tag: &str,
        operation: DcOperation,
    ) {
        let payload = serde_json::json!({
            "dc_id": dc_id.to_hex(),
            "data_collection_tag": data_collection_tag,
            "operation": operation,
        });
        self.publish(
            EventEnvelope::new(EventKind::DataCollectionUpdated, payload)
                .for_data_collection(dc_id),
        )
        .await;
    }

    /// Convenience: join_completed with the standard payload
    pub async fn publish_join_completed(&self, join_name: &str, result_dc_id: ObjectId) {
        let payload = serde_json::json!({
            "join_name": join_name,
            "result_dc_id": result_dc_id.to_hex(),
        });
        self.publish(EventEnvelope::new(EventKind::JoinCompleted, payload))
            .await;
    }

    pub async fn subscriber_count(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(BusMsg::SubscriberCount { reply })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dashboard_scoped_delivery() {
        let bus = EventBus::spawn(8);
        let user = ObjectId::new();
        let dashboard_a = ObjectId::new();
        let dashboard_b = ObjectId::new();

        let mut rx_a = bus.subscribe(user, dashboard_a).await.unwrap();
        let mut rx_b = bus.subscribe(user, dashboard_b).await.unwrap();

        let envelope = EventEnvelope::new(
            EventKind::DataCollectionCreated,
            serde_json::json!({"dc": "x"}),
        )
        .for_dashboard(dashboard_a);
        bus.publish(envelope).await;

        let received = tokio::time::timeout(std::time::Duration::from_secs(1), rx_a.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.event_type, EventKind::DataCollectionCreated);

        // Dashboard B must not see A's event
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(100), rx_b.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_unscoped_dc_event_broadcast_once() {
        let bus = EventBus::spawn(8);
        let mut rx = bus
            .subscribe(ObjectId::new(), ObjectId::new())
            .await
            .unwrap();

        let dc_id = ObjectId::new();
        bus.publish_dc_updated(dc_id, "samples", DcOperation::Updated)
            .await;

        let received = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.event_type, EventKind::DataCollectionUpdated);
        assert_eq!(received.data_collection_id, Some(dc_id));

        // Exactly one notification within the buffer window
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(100), rx.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_without_blocking() {
        let bus = EventBus::spawn(2);
        let user = ObjectId::new();
        let dashboard = ObjectId::new();
        let mut rx = bus.subscribe(user, dashboard).await.unwrap();

        for i in 0..10 {
            bus.publish(
                EventEnvelope::new(
                    EventKind::DataCollectionUpdated,
                    serde_json::json!({"seq": i}),
                )
                .for_dashboard(dashboard),
            )
            .await;
        }
        // Give the actor a moment to drain its inbox
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut received = 0;
        while let Ok(Some(_)) =
            tokio::time::timeout(std::time::Duration::from_millis(50), rx.recv()).await
        {
            received += 1;
        }
        assert!(received <= 2, "bounded queue must cap delivery, got {received}");
    }

    #[test]
    fn test_envelope_wire_format() {
        let dc_id = ObjectId::new();
        let envelope = EventEnvelope::new(
            EventKind::DataCollectionUpdated,
            serde_json::json!({"operation": "added"}),
        )
        .for_data_collection(dc_id);

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["event_type"], "data_collection_updated");
        assert!(json["timestamp"].is_string());
        assert_eq!(json["data_collection_id"], dc_id.to_hex());
        assert!(json.get("dashboard_id").is_none());
    }
}
