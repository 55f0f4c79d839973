//! WebSocket transport: one task per connection.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use scribble_core::{ClientMessage, ProtocolError};
use tracing::{debug, info, warn};

use crate::hub::HubHandle;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<HubHandle>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

/// Pump frames between the socket and the hub until either side goes away.
async fn handle_socket(socket: WebSocket, hub: HubHandle) {
    let Ok((conn, mut outbox)) = hub.connect().await else {
        warn!("Hub is gone, dropping new connection");
        return;
    };
    info!("New connection: {}", conn);

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            // Frames from the client
            frame = receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => match ClientMessage::decode(text.as_str()) {
                        Ok(message) => {
                            if hub.send(conn, message).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("Invalid message from {}: {}", conn, e);
                            if hub.reject(conn, e).await.is_err() {
                                break;
                            }
                        }
                    },
                    Some(Ok(Message::Binary(_))) => {
                        debug!("Binary frame from {}", conn);
                        if hub.reject(conn, ProtocolError::BinaryFrame).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // Ignore ping/pong
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", conn, e);
                        break;
                    }
                }
            }

            // Frames queued for this connection
            frame = outbox.recv() => {
                match frame {
                    Some(text) => {
                        if sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    hub.disconnect(conn).await;
    info!("Connection closed: {}", conn);
}
