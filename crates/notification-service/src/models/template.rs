//! 通知模板实体定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{DeliveryChannel, NotificationCategory, NotificationPriority, NotificationType};

/// 通知模板
///
/// 名称唯一；删除为软删除（is_active = false），被引用的模板不会物理删除
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct NotificationTemplate {
    pub id: Uuid,
    pub name: String,
    /// 含 `{{variable}}` 占位符的标题
    pub title: String,
    pub message: String,
    pub notification_type: NotificationType,
    pub category: NotificationCategory,
    pub priority: NotificationPriority,
    #[sqlx(json)]
    pub default_channels: Vec<DeliveryChannel>,
    /// 声明的变量列表
    #[sqlx(json)]
    pub variables: Vec<String>,
    pub metadata: serde_json::Value,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
