//! The relay gateway: WebSocket connections, the channel-subscription
//! registry, and the broadcast fanout engine.

pub mod bus;
pub mod connections;
pub mod coordinator;
pub mod fanout;
pub mod history;
pub mod protocol;
pub mod registry;
pub mod server;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use bus::BusMessage;
use fanout::Fanout;

/// Pumps inbound bus messages into the local fanout.
///
/// Messages this node published are dropped by their origin tag: local
/// subscribers already received them synchronously on the publish path, so
/// the bus echo would be a duplicate.
pub fn spawn_bus_pump(
    node_id: String,
    mut inbound: mpsc::UnboundedReceiver<BusMessage>,
    fanout: Arc<Fanout>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = inbound.recv().await {
            if message.origin == node_id {
                continue;
            }
            fanout.dispatch(&message.channel, &message.payload);
        }
        tracing::debug!("bus inbound pump stopped");
    })
}
