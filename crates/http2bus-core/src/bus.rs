//! Message-bus abstraction
//!
//! The gateway never talks to a broker directly. Everything it needs from the
//! bus is expressed by [`MessageBus`]: publish a request and receive its
//! correlated events, broadcast a payload on a namespace, and subscribe to
//! broadcasts.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use crate::error::BusResult;
use crate::message::{BusEvent, RequestMessage};

/// Capacity of the per-request event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Capacity of broadcast topics
pub const BROADCAST_CAPACITY: usize = 64;

/// A live subscription to a broadcast namespace
#[derive(Debug)]
pub struct Subscription {
    /// Handle to pass to [`MessageBus::unsubscribe`]
    pub id: u64,
    pub receiver: broadcast::Receiver<Value>,
}

/// Transport used by the gateway
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a request on a namespace
    ///
    /// The returned channel yields acks and responses for this request only.
    /// A closed channel means no further events will arrive.
    async fn publish(
        &self,
        namespace: &str,
        message: RequestMessage,
    ) -> BusResult<mpsc::Receiver<BusEvent>>;

    /// Publish a payload to every subscriber of a namespace
    async fn broadcast(&self, namespace: &str, payload: Value) -> BusResult<()>;

    /// Subscribe to broadcasts on a namespace
    fn subscribe(&self, namespace: &str) -> BusResult<Subscription>;

    /// Drop a subscription previously returned by [`MessageBus::subscribe`]
    fn unsubscribe(&self, id: u64) -> BusResult<()>;
}
