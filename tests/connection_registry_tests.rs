#![cfg(feature = "api")]

use gigboard::api::ws::dispatch_event;
use gigboard::api::{session_channel, ConnectionRegistry, Delivery, OutboundEvent};
use serde_json::json;

#[tokio::test]
async fn test_last_registration_wins() {
    let registry = ConnectionRegistry::new();
    let (tx_a, mut rx_a) = session_channel();
    let (tx_b, mut rx_b) = session_channel();

    registry.register(7, tx_a).await;
    registry.register(7, tx_b).await;

    let delivery = registry.send(7, OutboundEvent::message(json!("e"))).await;
    assert_eq!(delivery, Delivery::Delivered);
    assert_eq!(rx_b.try_recv().unwrap(), OutboundEvent::message(json!("e")));
    // The replaced sender was dropped with its map entry.
    assert!(rx_a.try_recv().is_err());
    assert_eq!(registry.len().await, 1);
}

#[tokio::test]
async fn test_send_to_offline_user_is_silent() {
    let registry = ConnectionRegistry::new();
    let delivery = registry.send(7, OutboundEvent::message(json!("e"))).await;
    assert_eq!(delivery, Delivery::Offline);
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn test_unregister_stops_delivery() {
    let registry = ConnectionRegistry::new();
    let (tx, mut rx) = session_channel();

    registry.register(7, tx).await;
    assert!(registry.unregister(7).await);
    assert!(!registry.unregister(7).await);

    assert_eq!(
        registry.send(7, OutboundEvent::message(json!("e"))).await,
        Delivery::Offline
    );
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_active_users_are_sorted() {
    let registry = ConnectionRegistry::new();
    let mut receivers = Vec::new();
    for user_id in [9, 2, 5] {
        let (tx, rx) = session_channel();
        receivers.push(rx);
        registry.register(user_id, tx).await;
    }

    assert_eq!(registry.active_users().await, vec![2, 5, 9]);
    assert!(registry.is_online(5).await);
    assert!(!registry.is_online(6).await);
}

#[tokio::test]
async fn test_dispatch_relays_send_message() {
    let registry = ConnectionRegistry::new();
    let (tx, mut rx) = session_channel();
    registry.register(2, tx).await;

    let frame = json!({
        "type": "SEND_MESSAGE",
        "body": {"recipient": 2, "message": {"chat": 1, "text": "hello"}}
    })
    .to_string();
    let delivery = dispatch_event(&registry, 1, &frame).await;

    assert_eq!(delivery, Some(Delivery::Delivered));
    let pushed = serde_json::to_value(rx.try_recv().unwrap()).unwrap();
    assert_eq!(
        pushed,
        json!({"type": "SEND_MESSAGE", "body": {"message": {"chat": 1, "text": "hello"}}})
    );
}

#[tokio::test]
async fn test_dispatch_ignores_malformed_frames() {
    let registry = ConnectionRegistry::new();
    let (tx, mut rx) = session_channel();
    registry.register(2, tx).await;

    assert_eq!(dispatch_event(&registry, 1, "not json").await, None);
    assert_eq!(
        dispatch_event(&registry, 1, r#"{"type": "SEND_MESSAGE", "body": {}}"#).await,
        None
    );
    assert!(rx.try_recv().is_err());
    assert!(registry.is_online(2).await);
}

#[tokio::test]
async fn test_dispatch_to_offline_recipient() {
    let registry = ConnectionRegistry::new();
    let frame = r#"{"type": "SEND_MESSAGE", "body": {"recipient": 42, "message": "ping"}}"#;
    assert_eq!(dispatch_event(&registry, 1, frame).await, Some(Delivery::Offline));
}
