//! Websocket endpoint
//!
//! Protocol: the first text frame is the handshake `{"Authorization": <user id>}`;
//! the server registers the session and answers `{"message": "hello"}`. Every
//! later text frame is an [`InboundEvent`].

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use crate::api::connections::{session_channel, ConnectionRegistry, Delivery, InboundEvent, OutboundEvent};
use crate::api::handlers::AppState;

#[derive(Debug, Deserialize)]
struct Handshake {
    #[serde(rename = "Authorization")]
    authorization: i64,
}

/// `GET /ws`
pub async fn websocket_endpoint(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let registry = state.connections.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, registry))
}

pub async fn handle_socket(socket: WebSocket, registry: ConnectionRegistry) {
    let (mut sink, mut stream) = socket.split();

    let user_id = match stream.next().await {
        Some(Ok(Message::Text(text))) => match serde_json::from_str::<Handshake>(&text) {
            Ok(handshake) => handshake.authorization,
            Err(e) => {
                tracing::debug!("Rejected websocket handshake: {}", e);
                let _ = sink.send(Message::Close(None)).await;
                return;
            }
        },
        _ => {
            tracing::debug!("Websocket closed before handshake");
            return;
        }
    };

    let (tx, mut rx) = session_channel();
    let connection_id = registry.register(user_id, tx).await;

    let greeting = serde_json::json!({"message": "hello"}).to_string();
    if sink.send(Message::Text(greeting)).await.is_err() {
        registry.unregister_connection(user_id, connection_id).await;
        return;
    }

    // Ends once the registry drops this session's sender or the socket fails.
    let mut writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("Failed to encode outbound event: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let reader_registry = registry.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    dispatch_event(&reader_registry, user_id, &text).await;
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!("Websocket error for user {}: {}", user_id, e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    registry.unregister_connection(user_id, connection_id).await;
}

/// Handle one inbound frame from `sender_id`. Malformed frames are logged and
/// ignored; None is returned for them.
pub async fn dispatch_event(registry: &ConnectionRegistry, sender_id: i64, text: &str) -> Option<Delivery> {
    let event = match serde_json::from_str::<InboundEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!("Ignoring malformed event from user {}: {}", sender_id, e);
            return None;
        }
    };

    match event {
        InboundEvent::SendMessage { recipient, message } => {
            tracing::debug!("Relaying message from user {} to user {}", sender_id, recipient);
            Some(registry.send(recipient, OutboundEvent::message(message)).await)
        }
    }
}
