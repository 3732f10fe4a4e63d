//! 通知列表查询条件

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{NotificationCategory, NotificationPriority, NotificationStatus, NotificationType};

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

/// 排序字段
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    Priority,
}

impl SortField {
    pub fn column(&self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
            Self::Priority => "priority",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// 通知列表过滤、排序与分页
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationQuery {
    pub notification_type: Option<NotificationType>,
    pub category: Option<NotificationCategory>,
    pub priority: Option<NotificationPriority>,
    pub status: Option<NotificationStatus>,
    pub is_read: Option<bool>,
    pub is_archived: Option<bool>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
    /// 从 1 开始
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl NotificationQuery {
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1) * self.limit()
    }
}

/// 分页结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> i64 {
        if self.limit <= 0 {
            return 0;
        }
        (self.total + self.limit - 1) / self.limit
    }
}
