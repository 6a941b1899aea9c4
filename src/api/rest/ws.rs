use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use crate::state::AppState;

/// Dispatcher console feed: every transition the engine makes.
pub async fn events_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let rx = state.engine.subscribe_events();
    ws.on_upgrade(|socket| forward(socket, rx, |_| true, "dispatch events"))
}

/// Offers pushed to one driver's device.
pub async fn offers_handler(
    ws: WebSocketUpgrade,
    Path(driver_id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let rx = state.offers.subscribe();
    ws.on_upgrade(move |socket| {
        forward(
            socket,
            rx,
            move |offer| offer.driver_id == driver_id,
            "driver offers",
        )
    })
}

async fn forward<T, F>(
    socket: WebSocket,
    mut rx: broadcast::Receiver<T>,
    wanted: F,
    feed: &'static str,
) where
    T: Clone + Serialize + Send + 'static,
    F: Fn(&T) -> bool + Send + 'static,
{
    let (mut sender, mut receiver) = socket.split();

    info!(feed, "websocket client connected");

    let send_task = tokio::spawn(async move {
        loop {
            let item = match rx.recv().await {
                Ok(item) => item,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(feed, skipped, "websocket client lagging; dropped messages");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            if !wanted(&item) {
                continue;
            }

            let json = match serde_json::to_string(&item) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize message for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!(feed, "websocket client disconnected");
}
