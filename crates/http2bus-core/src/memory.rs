//! In-process message bus
//!
//! Backs the daemon's demo mode and every test in the workspace. Responders
//! attach with [`MemoryBus::listen`] and answer through the reply handle on
//! each [`IncomingRequest`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use crate::bus::{MessageBus, Subscription, BROADCAST_CAPACITY, EVENT_CHANNEL_CAPACITY};
use crate::error::{BusError, BusResult};
use crate::message::{Ack, BusEvent, RequestMessage, ResponseMessage, ResponsePayload};

/// A request delivered to a listener
#[derive(Debug)]
pub struct IncomingRequest {
    pub namespace: String,
    pub message: RequestMessage,
    reply: mpsc::Sender<BusEvent>,
}

impl IncomingRequest {
    /// Send an ack; returns false once the requester has stopped listening
    pub async fn ack(&self, ack: Ack) -> bool {
        self.reply.send(BusEvent::Ack(ack)).await.is_ok()
    }

    /// Send a response; returns false once the requester has stopped listening
    pub async fn respond(&self, payload: ResponsePayload) -> bool {
        let message = ResponseMessage {
            correlation_id: Some(self.message.correlation_id.clone()),
            payload,
        };
        self.reply.send(BusEvent::Response(message)).await.is_ok()
    }
}

/// Message bus living entirely inside the process
pub struct MemoryBus {
    connected: AtomicBool,
    listeners: RwLock<HashMap<String, mpsc::UnboundedSender<IncomingRequest>>>,
    topics: RwLock<HashMap<String, broadcast::Sender<Value>>>,
    subscriptions: RwLock<HashMap<u64, String>>,
    next_subscription: AtomicU64,
    /// Publish log, kept only by [`MemoryBus::recording`] buses
    published: Option<RwLock<Vec<(String, RequestMessage)>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            listeners: RwLock::new(HashMap::new()),
            topics: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
            published: None,
        }
    }

    /// Bus that keeps every published request for later inspection
    pub fn recording() -> Self {
        Self {
            published: Some(RwLock::new(Vec::new())),
            ..Self::new()
        }
    }

    /// Receive every request published on a namespace, replacing any
    /// previous listener
    pub fn listen(&self, namespace: &str) -> mpsc::UnboundedReceiver<IncomingRequest> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.write().insert(namespace.to_string(), tx);
        rx
    }

    /// Simulate losing (or regaining) the broker
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Every request published so far, with its namespace; always empty
    /// unless the bus was built with [`MemoryBus::recording`]
    pub fn published(&self) -> Vec<(String, RequestMessage)> {
        self.published
            .as_ref()
            .map(|log| log.read().clone())
            .unwrap_or_default()
    }

    /// Number of live subscriptions
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    fn ensure_connected(&self) -> BusResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BusError::Unavailable("memory bus disconnected".to_string()))
        }
    }

    fn topic(&self, namespace: &str) -> broadcast::Sender<Value> {
        if let Some(sender) = self.topics.read().get(namespace) {
            return sender.clone();
        }
        self.topics
            .write()
            .entry(namespace.to_string())
            .or_insert_with(|| broadcast::channel(BROADCAST_CAPACITY).0)
            .clone()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(
        &self,
        namespace: &str,
        message: RequestMessage,
    ) -> BusResult<mpsc::Receiver<BusEvent>> {
        self.ensure_connected()?;
        if let Some(log) = &self.published {
            log.write().push((namespace.to_string(), message.clone()));
        }

        let (reply, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let listener = self.listeners.read().get(namespace).cloned();
        match listener {
            Some(listener) => {
                let request = IncomingRequest {
                    namespace: namespace.to_string(),
                    message,
                    reply,
                };
                if listener.send(request).is_err() {
                    debug!(namespace = %namespace, "Listener gone, dropping it");
                    self.listeners.write().remove(namespace);
                }
            }
            None => debug!(namespace = %namespace, "No listener for namespace"),
        }

        Ok(events)
    }

    async fn broadcast(&self, namespace: &str, payload: Value) -> BusResult<()> {
        self.ensure_connected()?;
        // No receivers is not an error for a broadcast
        let _ = self.topic(namespace).send(payload);
        Ok(())
    }

    fn subscribe(&self, namespace: &str) -> BusResult<Subscription> {
        self.ensure_connected()?;
        let receiver = self.topic(namespace).subscribe();
        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        self.subscriptions.write().insert(id, namespace.to_string());
        Ok(Subscription { id, receiver })
    }

    fn unsubscribe(&self, id: u64) -> BusResult<()> {
        self.subscriptions
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or(BusError::UnknownSubscription(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::RequestPayload;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_reaches_listener_and_reply_returns() {
        let bus = MemoryBus::recording();
        let mut incoming = bus.listen("abc:123");

        let mut events = bus
            .publish("abc:123", RequestMessage::new(RequestPayload::default()))
            .await
            .unwrap();

        let request = incoming.recv().await.unwrap();
        assert_eq!(request.namespace, "abc:123");
        assert!(request.respond(ResponsePayload::with_status(201)).await);
        drop(request);

        match events.recv().await {
            Some(BusEvent::Response(message)) => {
                assert_eq!(message.payload.status_code, Some(201));
                assert!(message.correlation_id.is_some());
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(events.recv().await.is_none());
        assert_eq!(bus.published().len(), 1);
    }

    #[tokio::test]
    async fn test_plain_bus_keeps_no_publish_log() {
        let bus = MemoryBus::new();
        for _ in 0..100 {
            bus.publish("abc:123", RequestMessage::new(RequestPayload::default()))
                .await
                .unwrap();
        }
        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn test_publish_without_listener_closes_stream() {
        let bus = MemoryBus::new();
        let mut events = bus
            .publish("nobody:home", RequestMessage::new(RequestPayload::default()))
            .await
            .unwrap();
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_disconnected_bus_fails() {
        let bus = MemoryBus::new();
        bus.set_connected(false);

        let result = bus
            .publish("abc:123", RequestMessage::new(RequestPayload::default()))
            .await;
        assert!(matches!(result, Err(BusError::Unavailable(_))));
        assert!(bus.subscribe("x:y").is_err());
        assert!(bus.broadcast("x:y", json!({})).await.is_err());
    }

    #[tokio::test]
    async fn test_broadcast_and_unsubscribe() {
        let bus = MemoryBus::new();
        let mut subscription = bus.subscribe("_routes:announce").unwrap();
        bus.broadcast("_routes:announce", json!({ "name": "a" }))
            .await
            .unwrap();

        assert_eq!(subscription.receiver.recv().await.unwrap()["name"], "a");
        assert_eq!(bus.subscription_count(), 1);

        bus.unsubscribe(subscription.id).unwrap();
        assert_eq!(bus.subscription_count(), 0);
        assert!(matches!(
            bus.unsubscribe(subscription.id),
            Err(BusError::UnknownSubscription(_))
        ));
    }
}
