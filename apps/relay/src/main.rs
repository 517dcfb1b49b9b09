use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chorus_common::id::{prefix, prefixed_ulid};
use chorus_relay::config::Config;
use chorus_relay::gateway;
use chorus_relay::gateway::bus::{InMemoryBroker, MessageBus, RedisBus};
use chorus_relay::gateway::history::{HistoryLog, MemoryHistory, RedisHistory};
use chorus_relay::AppState;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing — env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;
    let node_id = prefixed_ulid(prefix::NODE);

    let (bus, log, inbound): (
        Arc<dyn MessageBus>,
        Arc<dyn HistoryLog>,
        tokio::sync::mpsc::UnboundedReceiver<gateway::bus::BusMessage>,
    ) = match &config.redis_url {
        Some(url) => {
            let (bus, inbound) = RedisBus::connect(url, &node_id)
                .await
                .expect("redis bus connect failed");
            let log = RedisHistory::connect(url)
                .await
                .expect("redis history connect failed");
            tracing::info!(%node_id, "redis bus connected");
            (bus, Arc::new(log), inbound)
        }
        None => {
            tracing::warn!("REDIS_URL not set — in-process bus only, multi-node fanout disabled");
            let broker = InMemoryBroker::new();
            let (bus, inbound) = broker.attach(&node_id);
            (bus, Arc::new(MemoryHistory::new()), inbound)
        }
    };

    let state = AppState::assemble(config, node_id.clone(), bus, log);
    gateway::spawn_bus_pump(node_id, inbound, Arc::clone(&state.fanout));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = chorus_relay::routes::router(&state.config)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "chorus-relay listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app).await.expect("server error");
}
