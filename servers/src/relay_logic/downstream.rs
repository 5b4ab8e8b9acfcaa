use std::sync::Arc;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::relay_logic::state::AppState;
use lib_common::core::Dispatcher;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.dispatcher, state.shutdown))
}

/// Forwards dispatcher frames to one dashboard until either side goes away.
async fn handle_socket(socket: WebSocket, dispatcher: Arc<Dispatcher>, shutdown: CancellationToken) {
    let (id, mut frames) = dispatcher.add_subscriber();
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                if sender.send(Message::Text(String::from(&*frame).into())).await.is_err() {
                    tracing::debug!(subscriber = %id, "send failed, client gone");
                    break;
                }
            }
            // Dashboards only listen; anything but a close is ignored.
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(subscriber = %id, error = %e, "read failed");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
            _ = shutdown.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    dispatcher.remove_subscriber(id);
}
