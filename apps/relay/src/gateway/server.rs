//! WebSocket upgrade handler and per-connection event loop.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use chorus_common::id::{prefix, prefixed_ulid};

use crate::auth::middleware::SessionUser;
use crate::AppState;

use super::connections::{ConnectionHandle, OUTBOUND_BUFFER};
use super::protocol::{self, ClientFrame, ServerFrame};

pub fn router() -> Router<AppState> {
    Router::new().route("/gateway", get(ws_upgrade))
}

/// The session gate runs here, before the upgrade: an unauthenticated
/// client never reaches the relay core.
async fn ws_upgrade(
    user: SessionUser,
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state, user))
}

async fn handle_connection(socket: WebSocket, state: AppState, user: SessionUser) {
    let conn_id = prefixed_ulid(prefix::CONNECTION);
    let (ws_tx, mut ws_rx) = socket.split();

    let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
    let handle = Arc::new(ConnectionHandle::new(conn_id.clone(), tx));
    state.connections.add(Arc::clone(&handle));

    let writer = tokio::spawn(write_outbound(ws_tx, rx));

    tracing::info!(%conn_id, user = %user.username, "gateway connection established");

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => handle_frame(&state, &handle, text.as_str()).await,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => break,
            // Binary frames are not part of the protocol.
            Ok(_) => continue,
            Err(err) => {
                tracing::debug!(%conn_id, ?err, "ws read error");
                break;
            }
        }
    }

    // Unwind every subscription before the handle is discarded, so no
    // dispatch can observe a dangling connection.
    state.coordinator.connection_closed(&conn_id);
    state.connections.remove(&conn_id);
    drop(handle);
    let _ = writer.await;

    tracing::info!(%conn_id, user = %user.username, "gateway connection closed");
}

async fn handle_frame(state: &AppState, handle: &Arc<ConnectionHandle>, text: &str) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            // Malformed input drops the message, never the connection.
            tracing::debug!(conn_id = %handle.id(), ?err, "dropping malformed frame");
            return;
        }
    };

    match frame.kind.as_deref() {
        Some(protocol::SUBSCRIBE) => {
            // Replay strictly precedes registration: a live message can
            // never overtake older history on this connection. The cost is
            // that a message published remotely between the two steps is
            // not seen by this connection.
            let replayed = state.history.replay(handle, &frame.channel).await;
            state.coordinator.join(handle.id(), &frame.channel).await;
            ack(handle, ServerFrame::subscribed(&frame.channel));
            tracing::debug!(
                conn_id = %handle.id(),
                channel = %frame.channel,
                replayed,
                "subscribed"
            );
        }
        Some(protocol::UNSUBSCRIBE) => {
            state.coordinator.leave(handle.id(), &frame.channel);
            ack(handle, ServerFrame::unsubscribed(&frame.channel));
            tracing::debug!(conn_id = %handle.id(), channel = %frame.channel, "unsubscribed");
        }
        // Everything else publishes the raw frame text.
        _ => publish(state, &frame.channel, text).await,
    }
}

/// Publish path: three independent best-effort effects — append to the
/// history log, publish on the bus, dispatch to local subscribers. Log and
/// bus failures never block local delivery.
pub async fn publish(state: &AppState, channel: &str, raw: &str) {
    if let Err(err) = state.history.append(channel, raw).await {
        tracing::warn!(%channel, %err, "history append failed");
    }
    if let Err(err) = state.bus.publish(channel, raw).await {
        tracing::error!(%channel, %err, "bus publish failed");
    }
    state.fanout.dispatch(channel, raw);
}

fn ack(handle: &ConnectionHandle, frame: ServerFrame) {
    if let Err(err) = handle.send(Arc::new(frame.to_json())) {
        tracing::debug!(conn_id = %handle.id(), %err, "ack not delivered");
    }
}

async fn write_outbound(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Arc<String>>,
) {
    while let Some(payload) = rx.recv().await {
        if ws_tx
            .send(Message::Text(payload.as_str().into()))
            .await
            .is_err()
        {
            break;
        }
    }
}
