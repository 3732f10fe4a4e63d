//! 实时网关：多连接扇出与客户端消息

mod common;

use notification_service::models::DeliveryChannel;
use notification_service::realtime::{ClientMessage, ServerEvent};
use notification_service::service::dto::CreateNotificationRequest;
use tokio::sync::mpsc::Receiver;

fn drain(rx: &mut Receiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn new_notification_reaches_every_connection_of_the_user() {
    let t = common::engine();
    let gateway = &t.engine.gateway;

    let user = gateway.authenticate(Some("token-alice")).await.unwrap();
    let (_, mut first) = gateway.connect(&user);
    let (_, mut second) = gateway.connect(&user);
    let (_, mut other) = gateway.connect("bob");
    for rx in [&mut first, &mut second, &mut other] {
        assert!(matches!(drain(rx).first(), Some(ServerEvent::Connected { .. })));
    }

    let (notification, report) = t
        .engine
        .notifications
        .create_and_deliver(
            CreateNotificationRequest::literal("alice", "Live", "Now")
                .with_channels(vec![DeliveryChannel::InApp, DeliveryChannel::Websocket]),
        )
        .await
        .unwrap();
    let ws = report.unwrap().result_for(DeliveryChannel::Websocket).cloned().unwrap();
    assert_eq!(ws.metadata["connections"], 2);

    for rx in [&mut first, &mut second] {
        let events = drain(rx);
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::NewNotification { notification: n } if n.id == notification.id
        )));
    }
    assert!(
        drain(&mut other)
            .iter()
            .all(|e| !matches!(e, ServerEvent::NewNotification { .. }))
    );
}

#[tokio::test]
async fn mark_read_from_socket_updates_unread_count() {
    let t = common::engine();
    let gateway = &t.engine.gateway;
    let (notification, _) = t
        .engine
        .notifications
        .create_and_deliver(CreateNotificationRequest::literal("alice", "Read me", "..."))
        .await
        .unwrap();

    let (connection_id, mut rx) = gateway.connect("alice");
    drain(&mut rx);

    gateway
        .handle_message(
            connection_id,
            ClientMessage::MarkRead {
                notification_id: notification.id,
            },
        )
        .await
        .unwrap();

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        ServerEvent::NotificationsMarkedRead { notification_ids } if notification_ids == &vec![notification.id]
    )));
    assert!(
        events
            .iter()
            .any(|e| matches!(e, ServerEvent::UnreadCountUpdated { count: 0 }))
    );
    assert_eq!(t.engine.notifications.unread_count("alice").await.unwrap(), 0);
}

#[tokio::test]
async fn invalid_token_is_rejected_and_shutdown_disconnects_everyone() {
    let t = common::engine();
    let gateway = &t.engine.gateway;
    assert!(gateway.authenticate(Some("forged")).await.is_err());
    assert!(gateway.authenticate(None).await.is_err());

    let (_, mut rx) = gateway.connect("alice");
    drain(&mut rx);
    t.engine.shutdown().await;

    let events = drain(&mut rx);
    assert!(
        events
            .iter()
            .any(|e| matches!(e, ServerEvent::ForceDisconnect { .. }))
    );
    assert_eq!(gateway.registry().connection_count(), 0);
}
