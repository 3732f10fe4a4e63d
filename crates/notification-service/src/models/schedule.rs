//! 定时/周期通知实体定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

use super::enums::{
    DeliveryChannel, NotificationCategory, NotificationPriority, NotificationType,
    RecurringInterval,
};

/// 周期规则
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurringRule {
    pub interval: RecurringInterval,
    /// 仅 weekly 生效，0 = 周日 … 6 = 周六
    #[serde(default)]
    pub days_of_week: Option<Vec<u32>>,
    /// 仅 monthly 生效，1~31，超过当月天数时取月末
    #[serde(default)]
    pub day_of_month: Option<u32>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub max_occurrences: Option<i32>,
}

impl RecurringRule {
    pub fn new(interval: RecurringInterval) -> Self {
        Self {
            interval,
            days_of_week: None,
            day_of_month: None,
            end_date: None,
            max_occurrences: None,
        }
    }
}

/// 定时通知
///
/// 一次性定时在触发后停用；周期定时在规则耗尽（end_date 或 max_occurrences）时停用
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledNotification {
    pub id: Uuid,
    pub user_id: String,
    /// 模板通知时为空，由模板渲染
    #[sqlx(default)]
    pub title: Option<String>,
    #[sqlx(default)]
    pub message: Option<String>,
    #[sqlx(default)]
    pub notification_type: Option<NotificationType>,
    #[sqlx(default)]
    pub category: Option<NotificationCategory>,
    #[sqlx(default)]
    pub priority: Option<NotificationPriority>,
    #[sqlx(json)]
    pub channels: Vec<DeliveryChannel>,
    pub metadata: serde_json::Value,
    #[sqlx(default)]
    pub template_id: Option<Uuid>,
    #[sqlx(default)]
    pub template_variables: Option<serde_json::Value>,
    /// 下一次触发时间
    pub scheduled_at: DateTime<Utc>,
    pub timezone: String,
    #[sqlx(default)]
    pub recurring: Option<Json<RecurringRule>>,
    pub is_active: bool,
    #[sqlx(default)]
    pub last_executed_at: Option<DateTime<Utc>>,
    pub execution_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledNotification {
    pub fn recurring_rule(&self) -> Option<&RecurringRule> {
        self.recurring.as_ref().map(|rule| &rule.0)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.scheduled_at <= now
    }
}
