//! 通知与投递记录实体定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{
    DeliveryChannel, DeliveryStatus, NotificationCategory, NotificationPriority,
    NotificationStatus, NotificationType,
};

/// 通知
///
/// 一条面向用户的提醒。`channels` 为解析后的有效渠道，持久化后永不为空。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub user_id: String,
    pub title: String,
    pub message: String,
    pub notification_type: NotificationType,
    pub category: NotificationCategory,
    pub priority: NotificationPriority,
    pub status: NotificationStatus,
    /// 有序且去重
    #[sqlx(json)]
    pub channels: Vec<DeliveryChannel>,
    /// 透传数据，渠道识别 actionUrl / actionText / icon / badge
    pub metadata: serde_json::Value,
    /// 免打扰延后投递时间，scheduler 到点后投递
    #[sqlx(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[sqlx(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[sqlx(default)]
    pub template_id: Option<Uuid>,
    #[sqlx(default)]
    pub template_variables: Option<serde_json::Value>,
    pub is_read: bool,
    pub is_archived: bool,
    #[sqlx(default)]
    pub read_at: Option<DateTime<Utc>>,
    #[sqlx(default)]
    pub archived_at: Option<DateTime<Utc>>,
    #[sqlx(default)]
    pub batch_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Notification {
    /// 是否等待延后投递
    pub fn is_deferred(&self, now: DateTime<Utc>) -> bool {
        self.status == NotificationStatus::Pending && self.scheduled_at.is_some_and(|t| t > now)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|t| now > t)
    }

    /// 读取 metadata 中的字符串字段
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

/// 单渠道投递记录
///
/// (notification_id, channel) 唯一；attempts 只增不减
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryAttempt {
    pub id: Uuid,
    pub notification_id: Uuid,
    pub channel: DeliveryChannel,
    pub status: DeliveryStatus,
    pub attempts: i32,
    #[sqlx(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[sqlx(default)]
    pub delivered_at: Option<DateTime<Utc>>,
    #[sqlx(default)]
    pub failure_reason: Option<String>,
    /// 外部系统消息 ID（如邮件 message id）
    #[sqlx(default)]
    pub external_id: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 投递终态，写回投递记录
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryOutcome {
    pub status: DeliveryStatus,
    pub external_id: Option<String>,
    pub failure_reason: Option<String>,
    pub metadata: serde_json::Value,
    pub at: DateTime<Utc>,
}

/// 通知统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationStats {
    pub total: i64,
    pub unread: i64,
    pub read: i64,
    pub archived: i64,
    pub by_type: std::collections::HashMap<String, i64>,
    pub by_category: std::collections::HashMap<String, i64>,
    pub by_priority: std::collections::HashMap<String, i64>,
    pub by_status: std::collections::HashMap<String, i64>,
    /// 已送达的投递记录占全部终态投递记录的比例（0~1）
    pub delivery_rate: f64,
    /// 从通知创建到送达的平均耗时（毫秒）
    pub average_delivery_latency_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(status: NotificationStatus, scheduled_at: Option<DateTime<Utc>>) -> Notification {
        let now = Utc::now();
        Notification {
            id: Uuid::now_v7(),
            user_id: "user-1".to_string(),
            title: "t".to_string(),
            message: "m".to_string(),
            notification_type: NotificationType::Info,
            category: NotificationCategory::Task,
            priority: NotificationPriority::Medium,
            status,
            channels: vec![DeliveryChannel::InApp],
            metadata: json!({"actionUrl": "/tasks/1", "count": 3}),
            scheduled_at,
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

    #[test]
    fn test_is_deferred() {
        let now = Utc::now();
        let later = now + chrono::Duration::hours(2);
        assert!(sample(NotificationStatus::Pending, Some(later)).is_deferred(now));
        assert!(!sample(NotificationStatus::Delivered, Some(later)).is_deferred(now));
        assert!(!sample(NotificationStatus::Pending, None).is_deferred(now));
    }

    #[test]
    fn test_metadata_str() {
        let n = sample(NotificationStatus::Pending, None);
        assert_eq!(n.metadata_str("actionUrl"), Some("/tasks/1"));
        assert_eq!(n.metadata_str("count"), None);
        assert_eq!(n.metadata_str("missing"), None);
    }

    #[test]
    fn test_camel_case_serialization() {
        let n = sample(NotificationStatus::Pending, None);
        let value = serde_json::to_value(&n).unwrap();
        assert!(value.get("userId").is_some());
        assert!(value.get("isRead").is_some());
        assert_eq!(value["channels"], json!(["in_app"]));
    }
}
