//! External pub/sub bus adapters.
//!
//! The bus is the cross-process fanout primitive: ordered per channel,
//! at-least-once, and echoing a process's own publishes back to it. Payloads
//! travel inside a small JSON envelope carrying the publishing node's ID so
//! the inbound pump can drop self-echoes (locally-published messages are
//! already dispatched synchronously).
//!
//! Backed by Redis pub/sub in production and an in-process broker in tests
//! and single-node deployments.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// A bus subscribe/unsubscribe/publish failure. Never fatal: the caller
/// logs it and local bookkeeping stays intact.
#[derive(Debug)]
pub struct BusError {
    message: String,
}

impl BusError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for BusError {}

impl From<redis::RedisError> for BusError {
    fn from(err: redis::RedisError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<serde_json::Error> for BusError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// A message received from the bus.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub channel: String,
    /// Node ID of the publishing process.
    pub origin: String,
    pub payload: String,
}

/// Cross-process publish/subscribe. Subscribe/unsubscribe calls from one
/// process are individually atomic; inbound messages for every subscribed
/// channel arrive on the receiver handed out at construction.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BusError>;
    async fn subscribe(&self, channel: &str) -> Result<(), BusError>;
    async fn unsubscribe(&self, channel: &str) -> Result<(), BusError>;
}

/// Wire envelope for payloads crossing the bus.
#[derive(Debug, Serialize, Deserialize)]
struct BusEnvelope {
    origin: String,
    payload: String,
}

// ---------------------------------------------------------------------------
// Redis implementation
// ---------------------------------------------------------------------------

/// Redis pub/sub bus. Publishes through a `ConnectionManager`; subscription
/// state lives on a dedicated pub/sub connection whose stream half is pumped
/// into the inbound channel by a reader task.
pub struct RedisBus {
    node_id: String,
    publisher: redis::aio::ConnectionManager,
    sink: tokio::sync::Mutex<redis::aio::PubSubSink>,
}

impl RedisBus {
    /// Connect to Redis and start the inbound reader. Returns the bus and
    /// the receiver for messages on subscribed channels.
    pub async fn connect(
        url: &str,
        node_id: &str,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<BusMessage>), BusError> {
        let client = redis::Client::open(url)?;
        let publisher = client.get_connection_manager().await?;
        let (sink, mut stream) = client.get_async_pubsub().await?.split();

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                let channel = msg.get_channel_name().to_string();
                let raw: String = match msg.get_payload() {
                    Ok(raw) => raw,
                    Err(err) => {
                        tracing::warn!(?err, %channel, "unreadable bus payload dropped");
                        continue;
                    }
                };
                match serde_json::from_str::<BusEnvelope>(&raw) {
                    Ok(envelope) => {
                        let _ = inbound_tx.send(BusMessage {
                            channel,
                            origin: envelope.origin,
                            payload: envelope.payload,
                        });
                    }
                    Err(err) => {
                        tracing::warn!(?err, %channel, "malformed bus envelope dropped");
                    }
                }
            }
            tracing::warn!("bus pub/sub stream ended");
        });

        let bus = Arc::new(Self {
            node_id: node_id.to_string(),
            publisher,
            sink: tokio::sync::Mutex::new(sink),
        });
        Ok((bus, inbound_rx))
    }
}

#[async_trait]
impl MessageBus for RedisBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BusError> {
        let envelope = serde_json::to_string(&BusEnvelope {
            origin: self.node_id.clone(),
            payload: payload.to_string(),
        })?;
        let mut conn = self.publisher.clone();
        conn.publish::<_, _, ()>(channel, envelope).await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<(), BusError> {
        self.sink.lock().await.subscribe(channel).await?;
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), BusError> {
        self.sink.lock().await.unsubscribe(channel).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-process implementation
// ---------------------------------------------------------------------------

#[derive(Default)]
struct BrokerInner {
    /// channel → attached peers subscribed to it.
    topics: HashMap<String, HashSet<usize>>,
    /// peer → inbound sender.
    peers: HashMap<usize, mpsc::UnboundedSender<BusMessage>>,
    next_peer: usize,
}

/// In-process broker standing in for the external bus. Each `attach` call
/// models one relay process; publishes are delivered to every attached
/// subscriber of the channel, including the publisher itself, matching the
/// echo semantics of Redis pub/sub.
pub struct InMemoryBroker {
    inner: parking_lot::Mutex<BrokerInner>,
}

impl InMemoryBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: parking_lot::Mutex::new(BrokerInner::default()),
        })
    }

    /// Attach a logical process to the broker.
    pub fn attach(
        self: &Arc<Self>,
        node_id: &str,
    ) -> (Arc<InMemoryBus>, mpsc::UnboundedReceiver<BusMessage>) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let peer = {
            let mut inner = self.inner.lock();
            let peer = inner.next_peer;
            inner.next_peer += 1;
            inner.peers.insert(peer, inbound_tx);
            peer
        };
        let bus = Arc::new(InMemoryBus {
            broker: Arc::clone(self),
            peer,
            node_id: node_id.to_string(),
        });
        (bus, inbound_rx)
    }
}

/// One attached process's view of an [`InMemoryBroker`].
pub struct InMemoryBus {
    broker: Arc<InMemoryBroker>,
    peer: usize,
    node_id: String,
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BusError> {
        let inner = self.broker.inner.lock();
        if let Some(subscribers) = inner.topics.get(channel) {
            for peer in subscribers {
                if let Some(tx) = inner.peers.get(peer) {
                    let _ = tx.send(BusMessage {
                        channel: channel.to_string(),
                        origin: self.node_id.clone(),
                        payload: payload.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<(), BusError> {
        let mut inner = self.broker.inner.lock();
        inner
            .topics
            .entry(channel.to_string())
            .or_default()
            .insert(self.peer);
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), BusError> {
        let mut inner = self.broker.inner.lock();
        if let Some(subscribers) = inner.topics.get_mut(channel) {
            subscribers.remove(&self.peer);
            if subscribers.is_empty() {
                inner.topics.remove(channel);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_subscribed_peers_only() {
        let broker = InMemoryBroker::new();
        let (bus_a, mut rx_a) = broker.attach("node_a");
        let (bus_b, mut rx_b) = broker.attach("node_b");
        let (_bus_c, mut rx_c) = broker.attach("node_c");

        bus_a.subscribe("room1").await.unwrap();
        bus_b.subscribe("room1").await.unwrap();

        bus_b.publish("room1", "hello").await.unwrap();

        let got_a = rx_a.try_recv().unwrap();
        assert_eq!(got_a.channel, "room1");
        assert_eq!(got_a.origin, "node_b");
        assert_eq!(got_a.payload, "hello");

        // Echo: the publisher is subscribed and receives its own message.
        assert_eq!(rx_b.try_recv().unwrap().origin, "node_b");
        // Unsubscribed peer receives nothing.
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let broker = InMemoryBroker::new();
        let (bus_a, mut rx_a) = broker.attach("node_a");
        let (bus_b, _rx_b) = broker.attach("node_b");

        bus_a.subscribe("room1").await.unwrap();
        bus_a.unsubscribe("room1").await.unwrap();

        bus_b.publish("room1", "hello").await.unwrap();
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_fine() {
        let broker = InMemoryBroker::new();
        let (bus, _rx) = broker.attach("node_a");
        bus.publish("nobody-home", "hello").await.unwrap();
    }

    #[test]
    fn envelope_round_trips_origin() {
        let raw = serde_json::to_string(&BusEnvelope {
            origin: "node_1".to_string(),
            payload: r#"{"channel":"x","body":"hi"}"#.to_string(),
        })
        .unwrap();
        let parsed: BusEnvelope = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.origin, "node_1");
        assert_eq!(parsed.payload, r#"{"channel":"x","body":"hi"}"#);
    }
}
