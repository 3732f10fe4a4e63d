//! 通知服务枚举类型定义
//!
//! 所有枚举都支持数据库（sqlx）和 JSON（serde）序列化，
//! 数据库中以 varchar 存储小写字符串。

use serde::{Deserialize, Serialize};

/// 通知类型
///
/// 决定前端展示的图标与配色
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum NotificationType {
    #[default]
    Info,
    Success,
    Warning,
    Error,
    Reminder,
    Achievement,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Reminder => "reminder",
            Self::Achievement => "achievement",
        }
    }
}

/// 通知分类
///
/// 用户偏好按分类配置是否接收以及允许的渠道
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum NotificationCategory {
    Study,
    Task,
    Goal,
    Session,
    #[default]
    System,
    Social,
    Reminder,
}

impl NotificationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Study => "study",
            Self::Task => "task",
            Self::Goal => "goal",
            Self::Session => "session",
            Self::System => "system",
            Self::Social => "social",
            Self::Reminder => "reminder",
        }
    }
}

/// 通知优先级
///
/// 声明顺序即优先级顺序，可直接比较大小；urgent 可穿透免打扰时段
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum NotificationPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl NotificationPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    pub fn is_urgent(&self) -> bool {
        matches!(self, Self::Urgent)
    }
}

/// 通知状态
///
/// pending → sent/delivered/failed 由投递流程推进，read/archived 由用户操作产生
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum NotificationStatus {
    #[default]
    Pending,
    Sent,
    Delivered,
    Failed,
    Read,
    Archived,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Read => "read",
            Self::Archived => "archived",
        }
    }
}

/// 投递渠道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum DeliveryChannel {
    /// 站内信，写库即可见，保底渠道
    InApp,
    /// 实时推送到在线连接
    Websocket,
    Email,
    /// Web Push / 移动推送
    Push,
    Sms,
}

impl DeliveryChannel {
    pub const ALL: [DeliveryChannel; 5] = [
        Self::InApp,
        Self::Websocket,
        Self::Email,
        Self::Push,
        Self::Sms,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InApp => "in_app",
            Self::Websocket => "websocket",
            Self::Email => "email",
            Self::Push => "push",
            Self::Sms => "sms",
        }
    }
}

/// 单渠道投递状态
///
/// 同一 (通知, 渠道) 只会 pending → 终态，不会回退
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum DeliveryStatus {
    #[default]
    Pending,
    Delivered,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }
}

/// 批量任务状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum BatchStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl BatchStatus {
    /// 状态只能单调前进：pending → processing → {completed|failed}，
    /// 准备阶段失败时允许 pending → failed
    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Pending, Self::Failed)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// 周期间隔
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecurringInterval {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

/// 批量操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BulkAction {
    MarkAsRead,
    MarkAsUnread,
    Archive,
    Delete,
    UpdatePriority,
}
