//! 连接注册表
//!
//! 维护 用户 → 连接 与 连接 → 元数据 两张映射，建立在 RoomHub 之上：
//! 每个连接注册时加入 `user:{id}` 房间，可选订阅 `category:{c}` / `type:{t}` 房间。
//! 进程内状态，重启后从零重建。

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use super::message::{ConnectionId, ServerEvent};
use super::rooms::RoomHub;
use crate::models::{Notification, NotificationCategory, NotificationType};

pub fn user_room(user_id: &str) -> String {
    format!("user:{user_id}")
}

pub fn category_room(category: NotificationCategory) -> String {
    format!("category:{}", category.as_str())
}

pub fn type_room(notification_type: NotificationType) -> String {
    format!("type:{}", notification_type.as_str())
}

/// 连接元数据
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionMeta {
    pub connection_id: ConnectionId,
    pub user_id: String,
    pub connected_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

/// 注册结果
#[derive(Debug, Default)]
pub struct Registration {
    /// 超过单用户连接上限、需要踢下线的旧连接（仍处于注册状态）
    pub evicted: Vec<ConnectionId>,
}

/// 连接注册表
pub struct ConnectionRegistry {
    hub: Arc<RoomHub>,
    /// 用户 → 连接，按接入顺序
    by_user: DashMap<String, Vec<ConnectionId>>,
    connections: DashMap<ConnectionId, ConnectionMeta>,
    max_connections_per_user: usize,
}

impl ConnectionRegistry {
    pub fn new(hub: Arc<RoomHub>, max_connections_per_user: usize) -> Self {
        Self {
            hub,
            by_user: DashMap::new(),
            connections: DashMap::new(),
            max_connections_per_user: max_connections_per_user.max(1),
        }
    }

    pub fn hub(&self) -> &Arc<RoomHub> {
        &self.hub
    }

    /// 注册连接（幂等）
    ///
    /// 同一连接重复注册只刷新活跃时间；换了用户则先注销旧身份
    pub fn register(
        &self,
        connection_id: ConnectionId,
        user_id: &str,
        sender: mpsc::Sender<ServerEvent>,
    ) -> Registration {
        let now = Utc::now();

        let existing_user = self
            .connections
            .get(&connection_id)
            .map(|meta| meta.user_id.clone());
        match existing_user {
            Some(existing) if existing == user_id => {
                self.touch(connection_id);
                return Registration::default();
            }
            Some(_) => {
                self.unregister(connection_id);
            }
            None => {}
        }

        self.hub.attach(connection_id, sender);
        self.hub.join(connection_id, &user_room(user_id));
        self.connections.insert(
            connection_id,
            ConnectionMeta {
                connection_id,
                user_id: user_id.to_string(),
                connected_at: now,
                last_activity_at: now,
            },
        );

        let evicted = {
            let mut ids = self.by_user.entry(user_id.to_string()).or_default();
            ids.push(connection_id);
            let overflow = ids.len().saturating_sub(self.max_connections_per_user);
            ids.iter().take(overflow).copied().collect()
        };

        debug!(
            connection_id = %connection_id,
            user_id = %user_id,
            "连接已注册"
        );
        Registration { evicted }
    }

    /// 注销连接；用户最后一个连接注销后移除用户条目
    pub fn unregister(&self, connection_id: ConnectionId) -> Option<ConnectionMeta> {
        let (_, meta) = self.connections.remove(&connection_id)?;

        let now_empty = self.by_user.get_mut(&meta.user_id).is_some_and(|mut ids| {
            ids.retain(|id| *id != connection_id);
            ids.is_empty()
        });
        if now_empty {
            self.by_user.remove_if(&meta.user_id, |_, ids| ids.is_empty());
        }

        self.hub.detach(connection_id);
        debug!(
            connection_id = %connection_id,
            user_id = %meta.user_id,
            "连接已注销"
        );
        Some(meta)
    }

    /// 订阅分类/类型房间，返回连接当前所在房间
    pub fn subscribe(
        &self,
        connection_id: ConnectionId,
        categories: &[NotificationCategory],
        types: &[NotificationType],
    ) -> Vec<String> {
        for room in topic_rooms(categories, types) {
            self.hub.join(connection_id, &room);
        }
        self.hub.rooms_of(connection_id)
    }

    /// 退订分类/类型房间；`user:` 房间不可退订
    pub fn unsubscribe(
        &self,
        connection_id: ConnectionId,
        categories: &[NotificationCategory],
        types: &[NotificationType],
    ) -> Vec<String> {
        for room in topic_rooms(categories, types) {
            self.hub.leave(connection_id, &room);
        }
        self.hub.rooms_of(connection_id)
    }

    pub fn touch(&self, connection_id: ConnectionId) {
        if let Some(mut meta) = self.connections.get_mut(&connection_id) {
            meta.last_activity_at = Utc::now();
        }
    }

    pub fn meta(&self, connection_id: ConnectionId) -> Option<ConnectionMeta> {
        self.connections.get(&connection_id).map(|m| m.value().clone())
    }

    pub fn user_connections(&self, user_id: &str) -> Vec<ConnectionId> {
        self.by_user
            .get(user_id)
            .map(|ids| ids.value().clone())
            .unwrap_or_default()
    }

    pub fn is_user_connected(&self, user_id: &str) -> bool {
        self.by_user.contains_key(user_id)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn user_count(&self) -> usize {
        self.by_user.len()
    }

    pub fn all_connections(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|entry| *entry.key()).collect()
    }

    /// 最后活跃时间早于 cutoff 的连接
    pub fn idle_since(&self, cutoff: DateTime<Utc>) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .filter(|entry| entry.value().last_activity_at < cutoff)
            .map(|entry| *entry.key())
            .collect()
    }

    /// 向用户所有连接发送事件，返回收到的连接数
    pub fn send_to_user(&self, user_id: &str, event: &ServerEvent) -> usize {
        self.hub.emit(&user_room(user_id), event)
    }

    pub fn send_to_connection(&self, connection_id: ConnectionId, event: ServerEvent) -> bool {
        self.hub.emit_to(connection_id, event)
    }

    /// 推送新通知到用户房间，并镜像到分类/类型房间
    ///
    /// 分类/类型房间是全局的，镜像只落到属于通知接收人的连接上
    pub fn broadcast_notification(&self, notification: &Notification) -> usize {
        let event = ServerEvent::NewNotification {
            notification: notification.clone(),
        };
        let owned: HashSet<ConnectionId> = self
            .user_connections(&notification.user_id)
            .into_iter()
            .collect();

        let mut targets: HashSet<ConnectionId> = self
            .hub
            .members(&user_room(&notification.user_id))
            .into_iter()
            .collect();
        for room in [
            category_room(notification.category),
            type_room(notification.notification_type),
        ] {
            targets.extend(
                self.hub
                    .members(&room)
                    .into_iter()
                    .filter(|id| owned.contains(id)),
            );
        }

        targets
            .into_iter()
            .filter(|id| self.hub.emit_to(*id, event.clone()))
            .count()
    }
}

fn topic_rooms(categories: &[NotificationCategory], types: &[NotificationType]) -> Vec<String> {
    categories
        .iter()
        .map(|c| category_room(*c))
        .chain(types.iter().map(|t| type_room(*t)))
        .collect()
}
