//! Broadcast fanout: one message for a channel → one write per local
//! subscriber.
//!
//! Invoked from two call sites with identical semantics: synchronously
//! after a local publish (self-delivery, independent of bus latency) and
//! from the bus inbound pump for remotely-published messages.

use std::sync::Arc;

use super::connections::ConnectionRegistry;
use super::coordinator::SubscriptionCoordinator;

/// Outcome of one dispatch. Failed sends are counted and logged but never
/// remove a subscription; removal is the close/leave paths' job.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Delivers channel messages to every locally-subscribed connection.
pub struct Fanout {
    coordinator: Arc<SubscriptionCoordinator>,
    connections: Arc<ConnectionRegistry>,
}

impl Fanout {
    pub fn new(
        coordinator: Arc<SubscriptionCoordinator>,
        connections: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            coordinator,
            connections,
        }
    }

    pub fn dispatch(&self, channel: &str, payload: &str) -> DispatchReport {
        let subscribers = self.coordinator.registry().subscribers(channel);
        if subscribers.is_empty() {
            return DispatchReport::default();
        }

        let payload = Arc::new(payload.to_string());
        let mut report = DispatchReport::default();
        for conn_id in subscribers {
            let Some(handle) = self.connections.get(&conn_id) else {
                // Subscription outliving its handle would mean a close path
                // skipped the registry unwind.
                tracing::debug!(%conn_id, %channel, "subscriber has no handle");
                report.failed += 1;
                continue;
            };
            match handle.send(Arc::clone(&payload)) {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(%conn_id, %channel, %err, "dropping message for connection");
                }
            }
        }

        tracing::debug!(
            %channel,
            delivered = report.delivered,
            failed = report.failed,
            "dispatched"
        );
        report
    }
}
