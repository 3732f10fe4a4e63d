//! 实时推送网关
//!
//! 负责连接握手、客户端消息处理与服务端事件扇出，
//! 并实现分发器的 `Broadcaster` 输出端口。
//! 生命周期显式管理：`start` 启动空闲连接清理，`stop` 断开所有连接并清空状态。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use notify_shared::config::RealtimeConfig;
use notify_shared::observability::metrics as app_metrics;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::message::{ClientMessage, ConnectionId, ServerEvent};
use super::registry::ConnectionRegistry;
use crate::error::{NotificationError, Result};
use crate::identity::IdentityProvider;
use crate::models::Notification;
use crate::notification::Broadcaster;
use crate::repository::NotificationRepositoryTrait;

pub const REASON_INVALID_TOKEN: &str = "invalid token";
pub const REASON_IDLE_TIMEOUT: &str = "idle timeout";
pub const REASON_CONNECTION_LIMIT: &str = "connection limit exceeded";
pub const REASON_SHUTDOWN: &str = "server shutting down";

/// 实时推送网关
pub struct NotificationGateway {
    registry: Arc<ConnectionRegistry>,
    identity: Arc<dyn IdentityProvider>,
    notifications: Arc<dyn NotificationRepositoryTrait>,
    config: RealtimeConfig,
    shutdown: watch::Sender<bool>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationGateway {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        identity: Arc<dyn IdentityProvider>,
        notifications: Arc<dyn NotificationRepositoryTrait>,
        config: RealtimeConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            registry,
            identity,
            notifications,
            config,
            shutdown,
            sweeper: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    // ==================== 生命周期 ====================

    /// 启动空闲连接清理任务，重复调用无副作用
    pub async fn start(self: &Arc<Self>) {
        let mut sweeper = self.sweeper.lock().await;
        if sweeper.is_some() {
            return;
        }
        self.shutdown.send_replace(false);

        if self.config.idle_timeout_secs == 0 {
            info!("实时推送网关已启动（不清理空闲连接）");
            return;
        }

        let gateway = Arc::clone(self);
        let mut shutdown_rx = self.shutdown.subscribe();
        let idle_timeout = Duration::from_secs(self.config.idle_timeout_secs);
        let period = (idle_timeout / 2).max(Duration::from_secs(1));

        *sweeper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        gateway.sweep_idle(idle_timeout);
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("空闲连接清理任务退出");
                        break;
                    }
                }
            }
        }));

        info!(
            idle_timeout_secs = idle_timeout.as_secs(),
            max_connections_per_user = self.config.max_connections_per_user,
            "实时推送网关已启动"
        );
    }

    /// 断开所有连接并停止后台任务
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        if let Some(handle) = self.sweeper.lock().await.take() {
            let _ = handle.await;
        }

        let connections = self.registry.all_connections();
        let count = connections.len();
        for connection_id in connections {
            self.force_disconnect(connection_id, REASON_SHUTDOWN);
        }

        app_metrics::set_active_connections(0);
        info!(disconnected = count, "实时推送网关已停止");
    }

    /// 断开最后活跃时间超过 idle_timeout 的连接，返回断开数量
    pub fn sweep_idle(&self, idle_timeout: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(idle_timeout).unwrap_or(chrono::Duration::zero());
        let idle = self.registry.idle_since(cutoff);
        let count = idle.len();

        for connection_id in idle {
            self.force_disconnect(connection_id, REASON_IDLE_TIMEOUT);
        }
        if count > 0 {
            info!(count, "已断开空闲连接");
        }
        count
    }

    // ==================== 握手与连接 ====================

    /// 校验握手 Token，返回用户 ID
    pub async fn authenticate(&self, token: Option<&str>) -> Result<String> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| NotificationError::Unauthorized("缺少 Token".to_string()))?;

        self.identity.authenticate(token).await
    }

    /// 注册已认证的连接，返回连接 ID 与事件接收端
    ///
    /// 超过单用户连接上限时最早的连接会被踢下线
    pub fn connect(&self, user_id: &str) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(self.config.channel_buffer_size.max(1));
        let connection_id = Uuid::now_v7();

        let registration = self.registry.register(connection_id, user_id, tx);
        let connected_at = self
            .registry
            .meta(connection_id)
            .map(|m| m.connected_at)
            .unwrap_or_else(Utc::now);

        self.registry.send_to_connection(
            connection_id,
            ServerEvent::Connected {
                connection_id,
                user_id: user_id.to_string(),
                connected_at,
            },
        );

        for evicted in registration.evicted {
            warn!(
                connection_id = %evicted,
                user_id = %user_id,
                "超过单用户连接上限，断开最早的连接"
            );
            self.force_disconnect(evicted, REASON_CONNECTION_LIMIT);
        }

        app_metrics::set_active_connections(self.registry.connection_count());
        info!(
            connection_id = %connection_id,
            user_id = %user_id,
            total_connections = self.registry.connection_count(),
            "实时连接已建立"
        );
        (connection_id, rx)
    }

    /// 连接关闭时调用
    pub fn disconnect(&self, connection_id: ConnectionId) {
        if let Some(meta) = self.registry.unregister(connection_id) {
            app_metrics::set_active_connections(self.registry.connection_count());
            info!(
                connection_id = %connection_id,
                user_id = %meta.user_id,
                "实时连接已断开"
            );
        }
    }

    /// 通知客户端后注销连接
    ///
    /// 事件先入队再注销，发送任务会在通道关闭前把它写出
    pub fn force_disconnect(&self, connection_id: ConnectionId, reason: &str) {
        self.registry
            .send_to_connection(connection_id, ServerEvent::force_disconnect(reason));
        self.disconnect(connection_id);
    }

    // ==================== 客户端消息 ====================

    /// 处理客户端消息，回复直接写入该连接
    pub async fn handle_message(
        &self,
        connection_id: ConnectionId,
        message: ClientMessage,
    ) -> Result<()> {
        let Some(meta) = self.registry.meta(connection_id) else {
            return Err(NotificationError::Unauthorized("连接未注册".to_string()));
        };
        self.registry.touch(connection_id);

        match message {
            ClientMessage::Auth { .. } => {
                debug!(connection_id = %connection_id, "连接已认证，忽略重复的认证帧");
            }
            ClientMessage::Subscribe { categories, types } => {
                let rooms = self.registry.subscribe(connection_id, &categories, &types);
                self.registry
                    .send_to_connection(connection_id, ServerEvent::Subscribed { rooms });
            }
            ClientMessage::Unsubscribe { categories, types } => {
                let rooms = self.registry.unsubscribe(connection_id, &categories, &types);
                self.registry
                    .send_to_connection(connection_id, ServerEvent::Subscribed { rooms });
            }
            ClientMessage::MarkRead { notification_id } => {
                self.mark_read(connection_id, &meta.user_id, notification_id)
                    .await?;
            }
            ClientMessage::GetConnectionInfo => {
                let rooms = self.registry.hub().rooms_of(connection_id);
                let user_connections = self.registry.user_connections(&meta.user_id).len();
                self.registry.send_to_connection(
                    connection_id,
                    ServerEvent::ConnectionInfo {
                        connection_id,
                        user_id: meta.user_id.clone(),
                        connected_at: meta.connected_at,
                        last_activity_at: Utc::now(),
                        rooms,
                        user_connections,
                    },
                );
            }
        }
        Ok(())
    }

    async fn mark_read(
        &self,
        connection_id: ConnectionId,
        user_id: &str,
        notification_id: Uuid,
    ) -> Result<()> {
        let changed = self
            .notifications
            .mark_read(user_id, &[notification_id], Utc::now())
            .await?;

        if changed == 0
            && self
                .notifications
                .get_for_user(user_id, notification_id)
                .await?
                .is_none()
        {
            self.registry.send_to_connection(
                connection_id,
                ServerEvent::error(format!("通知不存在: {notification_id}")),
            );
            return Ok(());
        }

        self.registry.send_to_user(
            user_id,
            &ServerEvent::NotificationsMarkedRead {
                notification_ids: vec![notification_id],
            },
        );
        self.push_unread_count(user_id).await;
        Ok(())
    }

    /// 用户在线时推送最新未读数
    pub async fn push_unread_count(&self, user_id: &str) -> usize {
        if !self.registry.is_user_connected(user_id) {
            return 0;
        }

        match self.notifications.unread_count(user_id).await {
            Ok(count) => self
                .registry
                .send_to_user(user_id, &ServerEvent::UnreadCountUpdated { count }),
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "查询未读数失败");
                0
            }
        }
    }
}

#[async_trait]
impl Broadcaster for NotificationGateway {
    async fn send_to_user(&self, notification: &Notification) -> Result<usize> {
        if !self.registry.is_user_connected(&notification.user_id) {
            debug!(user_id = %notification.user_id, "用户不在线，跳过实时推送");
            return Ok(0);
        }

        let reached = self.registry.broadcast_notification(notification);
        self.push_unread_count(&notification.user_id).await;
        Ok(reached)
    }

    async fn emit_to_user(&self, user_id: &str, event: ServerEvent) -> usize {
        let reached = self.registry.send_to_user(user_id, &event);
        if matches!(
            event,
            ServerEvent::UnreadCountUpdated { .. } | ServerEvent::ForceDisconnect { .. }
        ) {
            return reached;
        }
        if reached > 0 {
            self.push_unread_count(user_id).await;
        }
        reached
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::StaticIdentityProvider;
    use crate::models::{
        DeliveryChannel, NotificationCategory, NotificationPriority, NotificationStatus,
        NotificationType,
    };
    use crate::realtime::RoomHub;
    use crate::repository::MemoryStore;
    use serde_json::json;

    fn gateway(max_per_user: usize) -> (Arc<MemoryStore>, Arc<NotificationGateway>) {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(ConnectionRegistry::new(Arc::new(RoomHub::new()), max_per_user));
        let identity = StaticIdentityProvider::new().with_token("good", "u1");
        let config = RealtimeConfig {
            max_connections_per_user: max_per_user,
            ..RealtimeConfig::default()
        };
        let gateway = NotificationGateway::new(registry, Arc::new(identity), store.clone(), config);
        (store, Arc::new(gateway))
    }

    fn notification(user_id: &str) -> Notification {
        let now = Utc::now();
        Notification {
            id: Uuid::now_v7(),
            user_id: user_id.to_string(),
            title: "t".to_string(),
            message: "m".to_string(),
            notification_type: NotificationType::Info,
            category: NotificationCategory::Task,
            priority: NotificationPriority::Medium,
            status: NotificationStatus::Delivered,
            channels: vec![DeliveryChannel::InApp, DeliveryChannel::Websocket],
            metadata: json!({}),
            scheduled_at: None,
            expires_at: None,
            template_id: None,
            template_variables: None,
            is_read: false,
            is_archived: false,
            read_at: None,
            archived_at: None,
            batch_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_authenticate() {
        let (_store, gateway) = gateway(5);
        assert_eq!(gateway.authenticate(Some("good")).await.unwrap(), "u1");
        assert!(matches!(
            gateway.authenticate(None).await,
            Err(NotificationError::Unauthorized(_))
        ));
        assert!(gateway.authenticate(Some("  ")).await.is_err());
        assert!(gateway.authenticate(Some("bad")).await.is_err());
    }

    #[tokio::test]
    async fn test_connect_sends_connected() {
        let (_store, gateway) = gateway(5);
        let (id, mut rx) = gateway.connect("u1");

        match rx.recv().await.unwrap() {
            ServerEvent::Connected { connection_id, user_id, .. } => {
                assert_eq!(connection_id, id);
                assert_eq!(user_id, "u1");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fan_out_to_every_connection_once() {
        let (store, gateway) = gateway(5);
        let n = notification("u1");
        NotificationRepositoryTrait::create(store.as_ref(), &n).await.unwrap();

        let (a, mut rx_a) = gateway.connect("u1");
        let (_b, mut rx_b) = gateway.connect("u1");
        gateway
            .handle_message(
                a,
                ClientMessage::Subscribe {
                    categories: vec![NotificationCategory::Task],
                    types: vec![],
                },
            )
            .await
            .unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);

        let reached = gateway.send_to_user(&n).await.unwrap();
        assert_eq!(reached, 2);

        for rx in [&mut rx_a, &mut rx_b] {
            let events = drain(rx);
            let news = events
                .iter()
                .filter(|e| matches!(e, ServerEvent::NewNotification { .. }))
                .count();
            assert_eq!(news, 1);
            assert!(events
                .iter()
                .any(|e| matches!(e, ServerEvent::UnreadCountUpdated { count: 1 })));
        }
    }

    #[tokio::test]
    async fn test_offline_user_is_noop() {
        let (_store, gateway) = gateway(5);
        assert_eq!(gateway.send_to_user(&notification("ghost")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_connection_cap_evicts_oldest() {
        let (_store, gateway) = gateway(1);
        let (first, mut rx_first) = gateway.connect("u1");
        let (second, _rx_second) = gateway.connect("u1");

        let events = drain(&mut rx_first);
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::ForceDisconnect { reason } if reason == REASON_CONNECTION_LIMIT
        )));
        assert_eq!(gateway.registry().user_connections("u1"), vec![second]);
        assert!(gateway.registry().meta(first).is_none());
    }

    #[tokio::test]
    async fn test_mark_read_over_socket() {
        let (store, gateway) = gateway(5);
        let n = notification("u1");
        NotificationRepositoryTrait::create(store.as_ref(), &n).await.unwrap();
        let (id, mut rx) = gateway.connect("u1");
        drain(&mut rx);

        gateway
            .handle_message(id, ClientMessage::MarkRead { notification_id: n.id })
            .await
            .unwrap();

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::NotificationsMarkedRead { notification_ids } if notification_ids == &vec![n.id]
        )));
        assert!(events
            .iter()
            .any(|e| matches!(e, ServerEvent::UnreadCountUpdated { count: 0 })));

        gateway
            .handle_message(id, ClientMessage::MarkRead { notification_id: Uuid::now_v7() })
            .await
            .unwrap();
        assert!(matches!(drain(&mut rx).as_slice(), [ServerEvent::Error { .. }]));
    }

    #[tokio::test]
    async fn test_sweep_and_stop() {
        let (_store, gateway) = gateway(5);
        let (_a, mut rx_a) = gateway.connect("u1");
        let (_b, _rx_b) = gateway.connect("u2");
        drain(&mut rx_a);

        assert_eq!(gateway.sweep_idle(Duration::from_secs(3600)), 0);

        gateway.start().await;
        gateway.stop().await;

        assert_eq!(gateway.registry().connection_count(), 0);
        assert!(matches!(
            drain(&mut rx_a).as_slice(),
            [ServerEvent::ForceDisconnect { reason }] if reason == REASON_SHUTDOWN
        ));
    }
}
