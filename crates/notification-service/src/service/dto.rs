//! 服务层请求与响应 DTO
//!
//! 请求体统一使用 camelCase，并通过 validator 做基础校验；
//! 跨字段的约束在各自的 `check` 方法中完成。

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::error::{NotificationError, Result};
use crate::models::{
    BulkAction, CategoryPreference, DeliveryChannel, NotificationCategory, NotificationPriority,
    NotificationType, PushKeys, RecurringInterval, RecurringRule,
};
use crate::notification::quiet_hours::parse_hhmm;

pub const MAX_BULK_IDS: usize = 100;
pub const MAX_BATCH_RECIPIENTS: usize = 10_000;

fn validate_hhmm(value: &str) -> std::result::Result<(), ValidationError> {
    parse_hhmm(value)
        .map(|_| ())
        .ok_or_else(|| ValidationError::new("hhmm").with_message("时间格式必须为 HH:mm".into()))
}

fn validate_timezone(value: &str) -> std::result::Result<(), ValidationError> {
    value
        .parse::<chrono_tz::Tz>()
        .map(|_| ())
        .map_err(|_| ValidationError::new("timezone").with_message("无效的 IANA 时区".into()))
}

// ==================== 通知 ====================

/// 创建通知请求
///
/// 指定 template_id 时标题与内容由模板渲染，否则两者必填
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateNotificationRequest {
    #[validate(length(min = 1, max = 255, message = "用户 ID 不能为空"))]
    pub user_id: String,
    #[validate(length(min = 1, max = 200, message = "标题长度必须在1-200个字符之间"))]
    pub title: Option<String>,
    #[validate(length(min = 1, max = 2000, message = "内容长度必须在1-2000个字符之间"))]
    pub message: Option<String>,
    pub notification_type: Option<NotificationType>,
    pub category: Option<NotificationCategory>,
    pub priority: Option<NotificationPriority>,
    pub channels: Option<Vec<DeliveryChannel>>,
    pub metadata: Option<serde_json::Value>,
    pub template_id: Option<Uuid>,
    pub template_variables: Option<serde_json::Value>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CreateNotificationRequest {
    /// 字面量通知
    pub fn literal(
        user_id: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            title: Some(title.into()),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    /// 模板通知
    pub fn templated(
        user_id: impl Into<String>,
        template_id: Uuid,
        variables: serde_json::Value,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            template_id: Some(template_id),
            template_variables: Some(variables),
            ..Default::default()
        }
    }

    pub fn with_channels(mut self, channels: Vec<DeliveryChannel>) -> Self {
        self.channels = Some(channels);
        self
    }

    pub fn with_category(mut self, category: NotificationCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// 字段校验 + 模板/字面量二选一
    pub fn check(&self, now: DateTime<Utc>) -> Result<()> {
        self.validate()?;

        match self.template_id {
            Some(_) if self.title.is_some() || self.message.is_some() => {
                return Err(NotificationError::Validation(
                    "模板通知不能同时指定标题或内容".to_string(),
                ));
            }
            None if self.title.is_none() || self.message.is_none() => {
                return Err(NotificationError::Validation(
                    "非模板通知必须提供标题和内容".to_string(),
                ));
            }
            _ => {}
        }

        if self.metadata.as_ref().is_some_and(|m| !m.is_object()) {
            return Err(NotificationError::Validation(
                "metadata 必须是 JSON 对象".to_string(),
            ));
        }
        if self.expires_at.is_some_and(|t| t <= now) {
            return Err(NotificationError::Validation("过期时间必须晚于当前时间".to_string()));
        }
        Ok(())
    }
}

/// 批量操作请求
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BulkOperationRequest {
    pub action: BulkAction,
    #[validate(length(min = 1, max = 100, message = "单次操作的通知数量必须在1-100之间"))]
    pub notification_ids: Vec<Uuid>,
    /// action 为 updatePriority 时必填
    pub priority: Option<NotificationPriority>,
}

impl BulkOperationRequest {
    pub fn check(&self) -> Result<()> {
        self.validate()?;
        if self.action == BulkAction::UpdatePriority && self.priority.is_none() {
            return Err(NotificationError::Validation(
                "updatePriority 操作必须提供 priority".to_string(),
            ));
        }
        Ok(())
    }
}

/// 批量操作结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOperationResult {
    pub action: BulkAction,
    pub requested: usize,
    pub affected: u64,
}

// ==================== 偏好 ====================

/// 更新偏好请求，未提供的字段保持不变
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePreferencesRequest {
    pub email_enabled: Option<bool>,
    pub push_enabled: Option<bool>,
    pub in_app_enabled: Option<bool>,
    pub sms_enabled: Option<bool>,
    pub quiet_hours_enabled: Option<bool>,
    #[validate(custom(function = "validate_hhmm"))]
    pub quiet_hours_start: Option<String>,
    #[validate(custom(function = "validate_hhmm"))]
    pub quiet_hours_end: Option<String>,
    #[validate(custom(function = "validate_timezone"))]
    pub timezone: Option<String>,
    /// 整体替换分类偏好
    pub category_preferences: Option<HashMap<NotificationCategory, CategoryPreference>>,
}

// ==================== 模板 ====================

/// 创建模板请求
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateTemplateRequest {
    #[validate(length(min = 1, max = 100, message = "模板名称长度必须在1-100个字符之间"))]
    pub name: String,
    #[validate(length(min = 1, max = 200, message = "标题长度必须在1-200个字符之间"))]
    pub title: String,
    #[validate(length(min = 1, max = 2000, message = "内容长度必须在1-2000个字符之间"))]
    pub message: String,
    #[serde(default)]
    pub notification_type: NotificationType,
    #[serde(default)]
    pub category: NotificationCategory,
    #[serde(default)]
    pub priority: NotificationPriority,
    #[serde(default)]
    pub default_channels: Vec<DeliveryChannel>,
    /// 未提供时从标题与内容中提取
    pub variables: Option<Vec<String>>,
    pub metadata: Option<serde_json::Value>,
}

/// 更新模板请求
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTemplateRequest {
    #[validate(length(min = 1, max = 100, message = "模板名称长度必须在1-100个字符之间"))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 200, message = "标题长度必须在1-200个字符之间"))]
    pub title: Option<String>,
    #[validate(length(min = 1, max = 2000, message = "内容长度必须在1-2000个字符之间"))]
    pub message: Option<String>,
    pub notification_type: Option<NotificationType>,
    pub category: Option<NotificationCategory>,
    pub priority: Option<NotificationPriority>,
    pub default_channels: Option<Vec<DeliveryChannel>>,
    pub variables: Option<Vec<String>>,
    pub metadata: Option<serde_json::Value>,
    pub is_active: Option<bool>,
}

/// 模板预览结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplatePreview {
    pub title: String,
    pub message: String,
    /// 声明了但未提供的变量
    pub missing_variables: Vec<String>,
}

// ==================== 推送订阅 ====================

/// 推送订阅请求
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubscribePushRequest {
    #[validate(url(message = "endpoint 必须是合法 URL"))]
    pub endpoint: String,
    pub keys: PushKeys,
    pub user_agent: Option<String>,
}

// ==================== 定时 ====================

/// 创建定时通知请求
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleNotificationRequest {
    #[validate(length(min = 1, max = 255, message = "用户 ID 不能为空"))]
    pub user_id: String,
    #[validate(length(min = 1, max = 200, message = "标题长度必须在1-200个字符之间"))]
    pub title: Option<String>,
    #[validate(length(min = 1, max = 2000, message = "内容长度必须在1-2000个字符之间"))]
    pub message: Option<String>,
    pub notification_type: Option<NotificationType>,
    pub category: Option<NotificationCategory>,
    pub priority: Option<NotificationPriority>,
    pub channels: Option<Vec<DeliveryChannel>>,
    pub metadata: Option<serde_json::Value>,
    pub template_id: Option<Uuid>,
    pub template_variables: Option<serde_json::Value>,
    /// 首次触发时间
    pub scheduled_at: DateTime<Utc>,
    #[validate(custom(function = "validate_timezone"))]
    pub timezone: Option<String>,
    pub recurring: Option<RecurringRule>,
}

impl ScheduleNotificationRequest {
    pub fn check(&self) -> Result<()> {
        self.validate()?;

        match self.template_id {
            Some(_) if self.title.is_some() || self.message.is_some() => {
                return Err(NotificationError::Validation(
                    "模板通知不能同时指定标题或内容".to_string(),
                ));
            }
            None if self.title.is_none() || self.message.is_none() => {
                return Err(NotificationError::Validation(
                    "非模板通知必须提供标题和内容".to_string(),
                ));
            }
            _ => {}
        }

        if let Some(rule) = &self.recurring {
            check_recurring_rule(rule, self.scheduled_at)?;
        }
        Ok(())
    }
}

/// 周期规则校验
pub fn check_recurring_rule(rule: &RecurringRule, first_fire: DateTime<Utc>) -> Result<()> {
    if let Some(days) = &rule.days_of_week {
        if rule.interval != RecurringInterval::Weekly {
            return Err(NotificationError::Validation(
                "daysOfWeek 仅适用于 weekly 周期".to_string(),
            ));
        }
        if days.is_empty() || days.iter().any(|d| *d > 6) {
            return Err(NotificationError::Validation(
                "daysOfWeek 取值必须在 0-6 之间且不能为空".to_string(),
            ));
        }
    }
    if let Some(day) = rule.day_of_month {
        if rule.interval != RecurringInterval::Monthly {
            return Err(NotificationError::Validation(
                "dayOfMonth 仅适用于 monthly 周期".to_string(),
            ));
        }
        if !(1..=31).contains(&day) {
            return Err(NotificationError::Validation(
                "dayOfMonth 取值必须在 1-31 之间".to_string(),
            ));
        }
    }
    if rule.max_occurrences.is_some_and(|m| m < 1) {
        return Err(NotificationError::Validation(
            "maxOccurrences 必须大于 0".to_string(),
        ));
    }
    if rule.end_date.is_some_and(|end| end < first_fire) {
        return Err(NotificationError::Validation(
            "endDate 不能早于首次触发时间".to_string(),
        ));
    }
    Ok(())
}

/// 更新定时通知请求，未提供的字段保持不变
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateScheduleRequest {
    #[validate(length(min = 1, max = 200, message = "标题长度必须在1-200个字符之间"))]
    pub title: Option<String>,
    #[validate(length(min = 1, max = 2000, message = "内容长度必须在1-2000个字符之间"))]
    pub message: Option<String>,
    pub priority: Option<NotificationPriority>,
    pub channels: Option<Vec<DeliveryChannel>>,
    pub metadata: Option<serde_json::Value>,
    pub template_variables: Option<serde_json::Value>,
    pub scheduled_at: Option<DateTime<Utc>>,
    #[validate(custom(function = "validate_timezone"))]
    pub timezone: Option<String>,
    pub recurring: Option<RecurringRule>,
    /// 为 true 时去掉周期规则，变为一次性定时
    #[serde(default)]
    pub clear_recurring: bool,
}

// ==================== 批量 ====================

/// 创建批量通知请求
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateBatchRequest {
    #[validate(length(min = 1, max = 200, message = "批量任务名称长度必须在1-200个字符之间"))]
    pub name: String,
    #[validate(length(min = 1, max = 2000, message = "描述长度必须在1-2000个字符之间"))]
    pub description: Option<String>,
    pub template_id: Option<Uuid>,
    pub template_variables: Option<serde_json::Value>,
    #[validate(length(min = 1, max = 200, message = "标题长度必须在1-200个字符之间"))]
    pub title: Option<String>,
    #[validate(length(min = 1, max = 2000, message = "内容长度必须在1-2000个字符之间"))]
    pub message: Option<String>,
    pub notification_type: Option<NotificationType>,
    pub category: Option<NotificationCategory>,
    pub priority: Option<NotificationPriority>,
    pub channels: Option<Vec<DeliveryChannel>>,
    pub metadata: Option<serde_json::Value>,
    #[validate(length(min = 1, max = 10000, message = "收件人数量必须在1-10000之间"))]
    pub recipients: Vec<String>,
    #[validate(length(min = 1, message = "创建人不能为空"))]
    pub created_by: String,
}

impl CreateBatchRequest {
    pub fn check(&self) -> Result<()> {
        self.validate()?;
        if self.template_id.is_none() && self.message.is_none() && self.description.is_none() {
            return Err(NotificationError::Validation(
                "非模板批量通知必须提供内容或描述".to_string(),
            ));
        }
        Ok(())
    }

    /// 为单个收件人生成创建请求
    ///
    /// 非模板批量缺省标题/内容时取批量名称/描述
    pub fn request_for(&self, user_id: &str) -> CreateNotificationRequest {
        let (title, message) = if self.template_id.is_some() {
            (None, None)
        } else {
            (
                self.title.clone().or_else(|| Some(self.name.clone())),
                self.message.clone().or_else(|| self.description.clone()),
            )
        };

        CreateNotificationRequest {
            user_id: user_id.to_string(),
            title,
            message,
            notification_type: self.notification_type,
            category: self.category,
            priority: self.priority,
            channels: self.channels.clone(),
            metadata: self.metadata.clone(),
            template_id: self.template_id,
            template_variables: self.template_variables.clone(),
            expires_at: None,
        }
    }
}
