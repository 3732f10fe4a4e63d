//! 批量通知任务实体定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{
    BatchStatus, DeliveryChannel, NotificationCategory, NotificationPriority, NotificationType,
};

/// 批量通知任务
///
/// 将一份通知定义扇出给多个收件人，状态单调前进
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct NotificationBatch {
    pub id: Uuid,
    pub name: String,
    #[sqlx(default)]
    pub description: Option<String>,
    #[sqlx(default)]
    pub template_id: Option<Uuid>,
    #[sqlx(default)]
    pub template_variables: Option<serde_json::Value>,
    pub notification_type: NotificationType,
    pub category: NotificationCategory,
    pub priority: NotificationPriority,
    #[sqlx(json)]
    pub channels: Vec<DeliveryChannel>,
    #[sqlx(json)]
    pub recipients: Vec<String>,
    pub status: BatchStatus,
    pub total_count: i32,
    pub success_count: i32,
    pub failure_count: i32,
    #[sqlx(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[sqlx(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 批量任务的状态变更
///
/// 由批量处理器推进，仓储按 can_transition_to 校验后写入
#[derive(Debug, Clone, PartialEq)]
pub struct BatchProgress {
    pub status: BatchStatus,
    pub success_count: i32,
    pub failure_count: i32,
    pub at: DateTime<Utc>,
}

impl BatchProgress {
    pub fn processing(at: DateTime<Utc>) -> Self {
        Self {
            status: BatchStatus::Processing,
            success_count: 0,
            failure_count: 0,
            at,
        }
    }

    pub fn finished(
        status: BatchStatus,
        success_count: i32,
        failure_count: i32,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            status,
            success_count,
            failure_count,
            at,
        }
    }
}
