use crate::ws::broadcaster::BroadcasterHandle;
use crate::ws::protocol::ClientMessage;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tracing::{debug, error, info, warn};

/// Handle a WebSocket subscriber connection
pub async fn handle_connection(socket: WebSocket, broadcaster: BroadcasterHandle) {
    let subscription = match broadcaster.subscribe().await {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to register subscriber: {}", e);
            return;
        }
    };
    let client_id = subscription.id;
    let mut frames = subscription.frames;
    info!("WebSocket client connected: {}", client_id);

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Forward init/update/sync frames to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if let Err(e) = ws_sender.send(Message::Text(frame.to_string().into())).await {
                warn!("Failed to send message to WebSocket: {}", e);
                return;
            }
        }
        // Channel closed by the broadcaster: service is shutting down
        let _ = ws_sender.send(Message::Close(None)).await;
    });

    // Keepalive reads; clients send nothing the service acts on
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg_result) = ws_receiver.next().await {
            let msg = match msg_result {
                Ok(m) => m,
                Err(e) => {
                    debug!("WebSocket error for client {}: {}", client_id, e);
                    break;
                }
            };

            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Ping) => {
                        debug!("Received ping from client {}", client_id);
                    }
                    Err(_) => {
                        debug!("Ignoring client message from {}: {}", client_id, text.as_str());
                    }
                },
                Message::Close(_) => {
                    info!("Client {} closed connection", client_id);
                    break;
                }
                Message::Ping(_) | Message::Pong(_) => {
                    // Axum handles ping/pong automatically
                }
                Message::Binary(_) => {
                    debug!("Ignoring binary message from client {}", client_id);
                }
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => {
            debug!("Send task completed for client {}", client_id);
            recv_task.abort();
        }
        _ = &mut recv_task => {
            debug!("Receive task completed for client {}", client_id);
            send_task.abort();
        }
    }

    broadcaster.unsubscribe(&client_id);
    info!("WebSocket client disconnected: {}", client_id);
}
