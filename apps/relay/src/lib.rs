pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod routes;

use std::sync::Arc;

use config::Config;
use gateway::bus::MessageBus;
use gateway::connections::ConnectionRegistry;
use gateway::coordinator::SubscriptionCoordinator;
use gateway::fanout::Fanout;
use gateway::history::{HistoryLog, HistoryService};

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// This process's identity on the bus, used to drop self-echoes.
    pub node_id: Arc<String>,
    pub connections: Arc<ConnectionRegistry>,
    pub coordinator: Arc<SubscriptionCoordinator>,
    pub fanout: Arc<Fanout>,
    pub history: Arc<HistoryService>,
    pub bus: Arc<dyn MessageBus>,
}

impl AppState {
    /// Wire the relay core around a bus and a history log.
    ///
    /// The caller still owns the bus's inbound receiver and is expected to
    /// hand it to [`gateway::spawn_bus_pump`] together with `fanout`.
    pub fn assemble(
        config: Config,
        node_id: String,
        bus: Arc<dyn MessageBus>,
        log: Arc<dyn HistoryLog>,
    ) -> Self {
        let connections = Arc::new(ConnectionRegistry::new());
        let coordinator = SubscriptionCoordinator::new(Arc::clone(&bus));
        let fanout = Arc::new(Fanout::new(
            Arc::clone(&coordinator),
            Arc::clone(&connections),
        ));
        let history = Arc::new(HistoryService::new(log, config.history_limit));

        Self {
            config: Arc::new(config),
            node_id: Arc::new(node_id),
            connections,
            coordinator,
            fanout,
            history,
            bus,
        }
    }
}
