pub mod auth;
pub mod channels;
pub mod health;

use axum::Router;
use tower_http::services::{ServeDir, ServeFile};

use crate::config::Config;
use crate::AppState;

pub fn router(config: &Config) -> Router<AppState> {
    let mut router = Router::new()
        .merge(health::router())
        .merge(crate::gateway::server::router())
        .nest("/api/v1", auth::router());

    // Channel pages and static assets only exist when a public dir is
    // configured; the relay API works without them.
    if let Some(dir) = &config.public_dir {
        router = router
            .merge(channels::router())
            .route_service("/c/{channel}", ServeFile::new(dir.join("index.html")))
            .fallback_service(ServeDir::new(dir));
    }

    router
}
