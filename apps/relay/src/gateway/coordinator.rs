//! Subscription coordinator: bridges registry transitions to the bus.
//!
//! The process must hold a bus subscription for a channel exactly while the
//! channel has local subscribers. Two disciplines enforce that:
//!
//! - the registry mutation and the bus-command enqueue happen under one
//!   ordering lock, so a channel's zero/non-zero transitions and the
//!   corresponding bus commands can never invert (a last-leave racing a
//!   first-join must produce `unsubscribe, subscribe` on the bus in that
//!   order, or the bus ends up inverted relative to local demand);
//! - a single worker task drains the command queue serially.
//!
//! Bus failures are logged, never propagated into the registry: local
//! bookkeeping and bus state may diverge transiently, which is a bounded
//! failure mode, not a crash condition.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use super::bus::MessageBus;
use super::registry::ChannelRegistry;

enum BusCommand {
    Subscribe {
        channel: String,
        done: oneshot::Sender<()>,
    },
    Unsubscribe {
        channel: String,
    },
}

/// Owns the channel registry and keeps the process's bus subscriptions in
/// sync with local demand.
pub struct SubscriptionCoordinator {
    registry: ChannelRegistry,
    /// Serializes registry transitions with their command enqueue.
    order: Mutex<()>,
    commands: mpsc::UnboundedSender<BusCommand>,
}

impl SubscriptionCoordinator {
    pub fn new(bus: Arc<dyn MessageBus>) -> Arc<Self> {
        let (commands, queue) = mpsc::unbounded_channel();
        tokio::spawn(run_bus_worker(bus, queue));
        Arc::new(Self {
            registry: ChannelRegistry::new(),
            order: Mutex::new(()),
            commands,
        })
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// Registers `conn_id` for `channel`. Resolves only after any bus
    /// subscribe the join required has been issued, so the caller can ack
    /// the join knowing the bus leg is in place.
    pub async fn join(&self, conn_id: &str, channel: &str) {
        let done = {
            let _order = self.order.lock();
            if self.registry.subscribe(conn_id, channel) {
                let (done_tx, done_rx) = oneshot::channel();
                let sent = self.commands.send(BusCommand::Subscribe {
                    channel: channel.to_string(),
                    done: done_tx,
                });
                sent.ok().map(|_| done_rx)
            } else {
                None
            }
        };

        if let Some(done) = done {
            let _ = done.await;
        }
    }

    /// Removes `conn_id` from `channel`, releasing the bus subscription if
    /// this was the last local subscriber.
    pub fn leave(&self, conn_id: &str, channel: &str) {
        let _order = self.order.lock();
        if self.registry.unsubscribe(conn_id, channel) {
            let _ = self.commands.send(BusCommand::Unsubscribe {
                channel: channel.to_string(),
            });
        }
    }

    /// Unwinds every subscription held by a closing connection. Must run
    /// before the connection's handle is discarded.
    pub fn connection_closed(&self, conn_id: &str) {
        let _order = self.order.lock();
        for channel in self.registry.unsubscribe_all(conn_id) {
            let _ = self.commands.send(BusCommand::Unsubscribe { channel });
        }
    }
}

async fn run_bus_worker(bus: Arc<dyn MessageBus>, mut queue: mpsc::UnboundedReceiver<BusCommand>) {
    while let Some(command) = queue.recv().await {
        match command {
            BusCommand::Subscribe { channel, done } => {
                if let Err(err) = bus.subscribe(&channel).await {
                    tracing::error!(%channel, %err, "bus subscribe failed");
                }
                // Completed even on failure: the join proceeds and the
                // divergence is bounded until the channel next transitions.
                let _ = done.send(());
            }
            BusCommand::Unsubscribe { channel } => {
                if let Err(err) = bus.unsubscribe(&channel).await {
                    tracing::error!(%channel, %err, "bus unsubscribe failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::bus::BusError;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Records bus calls in order for assertions.
    struct RecordingBus {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingBus {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl MessageBus for RecordingBus {
        async fn publish(&self, channel: &str, _payload: &str) -> Result<(), BusError> {
            self.calls.lock().push(format!("publish {channel}"));
            Ok(())
        }
        async fn subscribe(&self, channel: &str) -> Result<(), BusError> {
            self.calls.lock().push(format!("subscribe {channel}"));
            Ok(())
        }
        async fn unsubscribe(&self, channel: &str) -> Result<(), BusError> {
            self.calls.lock().push(format!("unsubscribe {channel}"));
            Ok(())
        }
    }

    /// Let the worker task drain the queue.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn first_join_subscribes_the_bus_once() {
        let bus = RecordingBus::new();
        let coordinator = SubscriptionCoordinator::new(bus.clone());

        coordinator.join("a", "x").await;
        coordinator.join("b", "x").await;
        // Idempotent re-join.
        coordinator.join("a", "x").await;

        settle().await;
        assert_eq!(bus.calls(), vec!["subscribe x"]);
    }

    #[tokio::test]
    async fn last_leave_unsubscribes_the_bus_once() {
        let bus = RecordingBus::new();
        let coordinator = SubscriptionCoordinator::new(bus.clone());

        coordinator.join("a", "x").await;
        coordinator.join("b", "x").await;
        coordinator.leave("a", "x");
        coordinator.leave("b", "x");
        // Leaving a channel we are not in does nothing.
        coordinator.leave("b", "x");

        settle().await;
        assert_eq!(bus.calls(), vec!["subscribe x", "unsubscribe x"]);
    }

    #[tokio::test]
    async fn close_unwinds_every_channel() {
        let bus = RecordingBus::new();
        let coordinator = SubscriptionCoordinator::new(bus.clone());

        coordinator.join("a", "x").await;
        coordinator.join("a", "y").await;
        coordinator.join("b", "x").await;

        coordinator.connection_closed("a");
        settle().await;

        // "x" still has b; only "y" is released.
        let calls = bus.calls();
        assert!(calls.contains(&"unsubscribe y".to_string()));
        assert!(!calls.contains(&"unsubscribe x".to_string()));
        assert!(coordinator.registry().channels_of("a").is_empty());
    }

    #[tokio::test]
    async fn leave_then_rejoin_keeps_bus_order() {
        let bus = RecordingBus::new();
        let coordinator = SubscriptionCoordinator::new(bus.clone());

        coordinator.join("a", "x").await;
        coordinator.leave("a", "x");
        coordinator.join("b", "x").await;
        coordinator.leave("b", "x");

        settle().await;
        assert_eq!(
            bus.calls(),
            vec!["subscribe x", "unsubscribe x", "subscribe x", "unsubscribe x"]
        );
    }

    #[tokio::test]
    async fn bus_proportionality_matches_registry() {
        let bus = RecordingBus::new();
        let coordinator = SubscriptionCoordinator::new(bus.clone());

        coordinator.join("a", "x").await;
        coordinator.join("b", "y").await;
        coordinator.connection_closed("a");
        settle().await;

        // Net bus state: subscribed to exactly the non-empty channels.
        let mut net: std::collections::HashSet<String> = std::collections::HashSet::new();
        for call in bus.calls() {
            let (op, channel) = call.split_once(' ').unwrap();
            match op {
                "subscribe" => net.insert(channel.to_string()),
                "unsubscribe" => net.remove(channel),
                _ => unreachable!(),
            };
        }
        assert_eq!(net.len(), 1);
        assert!(net.contains("y"));
        assert_eq!(coordinator.registry().channel_count(), 1);
    }

    #[tokio::test]
    async fn bus_failure_leaves_registry_intact() {
        struct FailingBus;

        #[async_trait]
        impl MessageBus for FailingBus {
            async fn publish(&self, _c: &str, _p: &str) -> Result<(), BusError> {
                Ok(())
            }
            async fn subscribe(&self, _c: &str) -> Result<(), BusError> {
                Err(BusError::new("bus down"))
            }
            async fn unsubscribe(&self, _c: &str) -> Result<(), BusError> {
                Ok(())
            }
        }

        let coordinator = SubscriptionCoordinator::new(Arc::new(FailingBus));
        // join still resolves and the local subscription is recorded.
        coordinator.join("a", "x").await;
        assert_eq!(coordinator.registry().subscribers("x"), vec!["a"]);
    }
}
