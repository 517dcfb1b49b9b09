//! Channel pages: the root assigns visitors a fresh random channel.

use axum::response::Redirect;
use axum::routing::get;
use axum::Router;

use chorus_common::id::{prefix, prefixed_ulid};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(fresh_channel))
}

async fn fresh_channel() -> Redirect {
    Redirect::temporary(&format!("/c/{}", prefixed_ulid(prefix::CHANNEL)))
}
