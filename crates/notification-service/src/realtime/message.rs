//! 实时协议消息定义
//!
//! JSON 帧，`type` 字段区分消息类型，字段名为 camelCase。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{BulkAction, Notification, NotificationCategory, NotificationType};

/// 连接 ID
pub type ConnectionId = Uuid;

/// 客户端 → 服务端
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// 握手阶段的认证帧，header 与 query 都没有 token 时使用
    Auth { token: String },
    Subscribe {
        #[serde(default)]
        categories: Vec<NotificationCategory>,
        #[serde(default)]
        types: Vec<NotificationType>,
    },
    Unsubscribe {
        #[serde(default)]
        categories: Vec<NotificationCategory>,
        #[serde(default)]
        types: Vec<NotificationType>,
    },
    MarkRead { notification_id: Uuid },
    GetConnectionInfo,
}

/// 服务端 → 客户端
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    Connected {
        connection_id: ConnectionId,
        user_id: String,
        connected_at: DateTime<Utc>,
    },
    NewNotification {
        notification: Notification,
    },
    NotificationsMarkedRead {
        notification_ids: Vec<Uuid>,
    },
    AllNotificationsRead {
        count: u64,
    },
    NotificationDeleted {
        notification_id: Uuid,
    },
    NotificationsCleared {
        count: u64,
    },
    NotificationsArchived {
        notification_ids: Vec<Uuid>,
    },
    BulkOperationCompleted {
        action: BulkAction,
        notification_ids: Vec<Uuid>,
        affected: u64,
    },
    UnreadCountUpdated {
        count: i64,
    },
    ForceDisconnect {
        reason: String,
    },
    ConnectionInfo {
        connection_id: ConnectionId,
        user_id: String,
        connected_at: DateTime<Utc>,
        last_activity_at: DateTime<Utc>,
        rooms: Vec<String>,
        user_connections: usize,
    },
    Subscribed {
        rooms: Vec<String>,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::NewNotification { .. } => "newNotification",
            Self::NotificationsMarkedRead { .. } => "notificationsMarkedRead",
            Self::AllNotificationsRead { .. } => "allNotificationsRead",
            Self::NotificationDeleted { .. } => "notificationDeleted",
            Self::NotificationsCleared { .. } => "notificationsCleared",
            Self::NotificationsArchived { .. } => "notificationsArchived",
            Self::BulkOperationCompleted { .. } => "bulkOperationCompleted",
            Self::UnreadCountUpdated { .. } => "unreadCountUpdated",
            Self::ForceDisconnect { .. } => "forceDisconnect",
            Self::ConnectionInfo { .. } => "connectionInfo",
            Self::Subscribed { .. } => "subscribed",
            Self::Error { .. } => "error",
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn force_disconnect(reason: impl Into<String>) -> Self {
        Self::ForceDisconnect {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage =
            serde_json::from_value(json!({"type": "subscribe", "categories": ["task"]})).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Subscribe {
                categories: vec![NotificationCategory::Task],
                types: vec![],
            }
        );

        let id = Uuid::now_v7();
        let msg: ClientMessage =
            serde_json::from_value(json!({"type": "markRead", "notificationId": id})).unwrap();
        assert_eq!(msg, ClientMessage::MarkRead { notification_id: id });

        let msg: ClientMessage =
            serde_json::from_value(json!({"type": "getConnectionInfo"})).unwrap();
        assert_eq!(msg, ClientMessage::GetConnectionInfo);
    }

    #[test]
    fn test_server_event_shape() {
        let value = serde_json::to_value(ServerEvent::UnreadCountUpdated { count: 4 }).unwrap();
        assert_eq!(value, json!({"type": "unreadCountUpdated", "count": 4}));

        let event = ServerEvent::force_disconnect("invalid token");
        assert_eq!(event.event_name(), "forceDisconnect");
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "forceDisconnect", "reason": "invalid token"})
        );
    }

    #[test]
    fn test_event_name_matches_tag() {
        let event = ServerEvent::NotificationsMarkedRead {
            notification_ids: vec![],
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], event.event_name());
        assert!(value.get("notificationIds").is_some());
    }
}
