use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};

use crate::signaling::{SignalingHandler, SignalingServer};

/// Serves one signaling connection. Messages from the client are handled in
/// arrival order; everything addressed to it goes through a writer task.
pub async fn handle_signaling_websocket(websocket: WebSocket, server: Arc<SignalingServer>) {
    let (mut ws_sender, mut ws_receiver) = websocket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let mut handler = SignalingHandler::new(server, tx).await;
    let peer_id = handler.peer_id().to_string();
    tracing::info!(peer_id = %peer_id, "Signaling connection established");

    let writer_peer_id = peer_id.clone();
    let sender_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = ws_sender.send(message).await {
                tracing::error!(peer_id = %writer_peer_id, error = %e, "Failed to send WebSocket message");
                break;
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(message) if message.is_close() => break,
            Ok(message) => {
                if let Ok(text) = message.to_str() {
                    handler.handle_text(text).await;
                }
            }
            Err(e) => {
                tracing::warn!(peer_id = %peer_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    handler.cleanup().await;
    sender_task.abort();
    tracing::info!(peer_id = %peer_id, "Signaling connection closed");
}
