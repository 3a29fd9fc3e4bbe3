//! Registry of live websocket sessions
//!
//! Maps a user id to the outbound channel of that user's socket. One session
//! per user: registering again replaces the previous entry. Delivery is
//! fire-and-forget and at-most-once; nothing is queued for offline users, and
//! a session whose buffer is full is dropped rather than left to grow.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};

/// Events a session may have in flight before it counts as stalled.
pub const SESSION_BUFFER: usize = 32;

/// Outbound half of a session channel.
pub type SessionSender = mpsc::Sender<OutboundEvent>;

/// Bounded channel feeding one socket writer.
pub fn session_channel() -> (SessionSender, mpsc::Receiver<OutboundEvent>) {
    mpsc::channel(SESSION_BUFFER)
}

/// Identifies one socket session, so a stale session cannot evict a newer one.
pub type ConnectionId = u64;

/// Event sent by a client over its socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboundEvent {
    SendMessage {
        recipient: i64,
        message: serde_json::Value,
    },
}

/// Event pushed to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundEvent {
    SendMessage { message: serde_json::Value },
}

impl OutboundEvent {
    pub fn message(message: serde_json::Value) -> Self {
        OutboundEvent::SendMessage { message }
    }
}

/// Outcome of [`ConnectionRegistry::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the recipient's socket writer.
    Delivered,
    /// Recipient has no session; the event was dropped.
    Offline,
    /// Recipient's channel was closed or full; the session was removed.
    Disconnected,
}

#[derive(Debug, Clone)]
struct Connection {
    id: ConnectionId,
    tx: SessionSender,
}

/// Shared user id -> session map
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<i64, Connection>>>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `user_id` to `tx`, replacing any earlier session of that user.
    pub async fn register(&self, user_id: i64, tx: SessionSender) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut connections = self.connections.write().await;
        if connections.insert(user_id, Connection { id, tx }).is_some() {
            tracing::debug!("User {} reconnected, previous session replaced", user_id);
        } else {
            tracing::debug!("User {} connected", user_id);
        }
        id
    }

    /// Drop whatever session `user_id` has. Returns false if there was none.
    pub async fn unregister(&self, user_id: i64) -> bool {
        let mut connections = self.connections.write().await;
        let removed = connections.remove(&user_id).is_some();
        if removed {
            tracing::debug!("User {} disconnected", user_id);
        }
        removed
    }

    /// Drop the session of `user_id` only if it is still `connection_id`.
    pub async fn unregister_connection(&self, user_id: i64, connection_id: ConnectionId) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get(&user_id) {
            Some(current) if current.id == connection_id => {
                connections.remove(&user_id);
                tracing::debug!("User {} disconnected", user_id);
                true
            }
            _ => false,
        }
    }

    /// Push `event` to the session of `user_id`, if any.
    pub async fn send(&self, user_id: i64, event: OutboundEvent) -> Delivery {
        let failed = {
            let connections = self.connections.read().await;
            match connections.get(&user_id) {
                None => {
                    tracing::trace!("User {} is offline, event dropped", user_id);
                    return Delivery::Offline;
                }
                Some(conn) => match conn.tx.try_send(event) {
                    Ok(()) => return Delivery::Delivered,
                    Err(TrySendError::Full(_)) => {
                        tracing::warn!("Session of user {} is not draining events, dropping it", user_id);
                        conn.id
                    }
                    Err(TrySendError::Closed(_)) => {
                        tracing::debug!("Channel of user {} is closed, dropping session", user_id);
                        conn.id
                    }
                },
            }
        };

        self.unregister_connection(user_id, failed).await;
        Delivery::Disconnected
    }

    /// Users with a session, in ascending id order.
    pub async fn active_users(&self) -> Vec<i64> {
        let connections = self.connections.read().await;
        let mut users: Vec<i64> = connections.keys().copied().collect();
        users.sort_unstable();
        users
    }

    pub async fn is_online(&self, user_id: i64) -> bool {
        self.connections.read().await.contains_key(&user_id)
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_inbound_wire_format() {
        let event: InboundEvent = serde_json::from_value(json!({
            "type": "SEND_MESSAGE",
            "body": {"recipient": 7, "message": {"text": "hi"}}
        }))
        .unwrap();
        assert_eq!(
            event,
            InboundEvent::SendMessage {
                recipient: 7,
                message: json!({"text": "hi"})
            }
        );
    }

    #[test]
    fn test_outbound_wire_format() {
        let value = serde_json::to_value(OutboundEvent::message(json!("ping"))).unwrap();
        assert_eq!(value, json!({"type": "SEND_MESSAGE", "body": {"message": "ping"}}));
    }

    #[test]
    fn test_unknown_event_type_is_rejected() {
        let result = serde_json::from_value::<InboundEvent>(json!({
            "type": "DELETE_EVERYTHING",
            "body": {}
        }));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_closed_channel_counts_as_disconnect() {
        let registry = ConnectionRegistry::new();
        let (tx, rx) = session_channel();
        registry.register(3, tx).await;
        drop(rx);

        assert_eq!(
            registry.send(3, OutboundEvent::message(json!(1))).await,
            Delivery::Disconnected
        );
        assert!(!registry.is_online(3).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_stale_session_does_not_evict_newer_one() {
        let registry = ConnectionRegistry::new();
        let (old_tx, _old_rx) = session_channel();
        let (new_tx, _new_rx) = session_channel();

        let old = registry.register(5, old_tx).await;
        let new = registry.register(5, new_tx).await;
        assert_ne!(old, new);

        assert!(!registry.unregister_connection(5, old).await);
        assert!(registry.is_online(5).await);
        assert!(registry.unregister_connection(5, new).await);
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn test_full_buffer_counts_as_disconnect() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = session_channel();
        registry.register(4, tx).await;

        for n in 0..SESSION_BUFFER {
            assert_eq!(
                registry.send(4, OutboundEvent::message(json!(n))).await,
                Delivery::Delivered
            );
        }
        assert_eq!(
            registry.send(4, OutboundEvent::message(json!("overflow"))).await,
            Delivery::Disconnected
        );
        assert!(!registry.is_online(4).await);

        // What was already buffered still drains, then the channel ends.
        for n in 0..SESSION_BUFFER {
            assert_eq!(rx.recv().await, Some(OutboundEvent::message(json!(n))));
        }
        assert_eq!(rx.recv().await, None);
    }
}
