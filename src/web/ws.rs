//! Viewer WebSocket endpoint
//!
//! Each connection gets a writer task draining its hub queue (binary NAL
//! frames and JSON status messages, in enqueue order) and a reader loop that
//! feeds text frames to the [`ControlRouter`].

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::control::ControlRouter;
use crate::protocol::Outbound;
use crate::state::AppState;
use crate::stream::{BroadcastHub, ViewerHandle, ViewerId};

/// WebSocket upgrade handler for `/ws` and `/`
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let max_message_size = state.config.get().web.max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

/// Leaves the hub when the connection handler exits, however it exits
struct ViewerGuard {
    hub: Arc<BroadcastHub>,
    id: ViewerId,
}

impl Drop for ViewerGuard {
    fn drop(&mut self) {
        self.hub.leave(&self.id);
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let ViewerHandle {
        id,
        tx,
        mut rx,
        evicted,
    } = state.hub.join();
    let _guard = ViewerGuard {
        hub: state.hub.clone(),
        id: id.clone(),
    };

    let (mut sender, mut receiver) = socket.split();
    let router = ControlRouter::new(state.clone(), id.clone(), tx);
    let mut shutdown = state.shutdown_signal();

    let mut writer = tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            let message = match item {
                Outbound::Video(data) => Message::Binary(data.into()),
                Outbound::Json(msg) => match serde_json::to_string(&msg) {
                    Ok(json) => Message::Text(json),
                    Err(e) => {
                        warn!("Failed to serialize message: {}", e);
                        continue;
                    }
                },
            };
            if sender.send(message).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    loop {
        tokio::select! {
            _ = evicted.cancelled() => {
                info!("Viewer {} evicted", id);
                break;
            }
            _ = shutdown.recv() => {
                debug!("Viewer {} closing for shutdown", id);
                break;
            }
            _ = &mut writer => {
                debug!("Viewer {} writer finished", id);
                break;
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => router.handle_text(&text).await,
                    Some(Ok(Message::Binary(data))) => {
                        debug!("Ignoring {} byte binary frame from viewer {}", data.len(), id);
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Viewer {} closed the connection", id);
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("Viewer {} receive error: {}", id, e);
                        break;
                    }
                    // Ping/pong handled by axum
                    _ => {}
                }
            }
        }
    }

    writer.abort();
}
