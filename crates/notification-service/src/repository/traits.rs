//! 仓储 Trait 定义
//!
//! 定义仓储接口，便于服务层依赖抽象而非具体实现，支持 mock 测试。
//! 涉及用户数据的操作都带 user_id，归属不符的 id 视同不存在。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    BatchProgress, DeliveryAttempt, DeliveryChannel, DeliveryOutcome, Notification,
    NotificationBatch, NotificationPreferences, NotificationPriority, NotificationQuery,
    NotificationStats, NotificationStatus, NotificationTemplate, PushSubscription,
    ScheduledNotification,
};

/// 通知仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationRepositoryTrait: Send + Sync {
    async fn create(&self, notification: &Notification) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<Notification>>;
    async fn get_for_user(&self, user_id: &str, id: Uuid) -> Result<Option<Notification>>;
    /// 返回当前页数据与满足条件的总数
    async fn list(
        &self,
        user_id: &str,
        query: &NotificationQuery,
    ) -> Result<(Vec<Notification>, i64)>;

    // 读状态与归档，返回实际发生变化的条数
    async fn mark_read(&self, user_id: &str, ids: &[Uuid], at: DateTime<Utc>) -> Result<u64>;
    async fn mark_unread(&self, user_id: &str, ids: &[Uuid]) -> Result<u64>;
    async fn mark_all_read(&self, user_id: &str, at: DateTime<Utc>) -> Result<u64>;
    async fn archive(&self, user_id: &str, ids: &[Uuid], at: DateTime<Utc>) -> Result<u64>;
    async fn update_priority(
        &self,
        user_id: &str,
        ids: &[Uuid],
        priority: NotificationPriority,
    ) -> Result<u64>;
    async fn delete(&self, user_id: &str, ids: &[Uuid]) -> Result<u64>;
    async fn clear_all(&self, user_id: &str) -> Result<u64>;

    /// 投递流程回写状态，不覆盖用户已读/归档产生的状态
    async fn update_delivery_status(&self, id: Uuid, status: NotificationStatus) -> Result<()>;

    async fn unread_count(&self, user_id: &str) -> Result<i64>;
    /// 只填充计数类字段，投递率与时延由投递记录仓储补充
    async fn stats(&self, user_id: &str) -> Result<NotificationStats>;

    /// 免打扰延后且已到期的待投递通知
    async fn list_due_deferred(&self, now: DateTime<Utc>, limit: i64)
    -> Result<Vec<Notification>>;
}

/// 投递记录仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliveryAttemptRepositoryTrait: Send + Sync {
    /// 按 (notification_id, channel) 插入或重置为 pending，attempts 保持不变
    async fn upsert_pending(
        &self,
        notification_id: Uuid,
        channel: DeliveryChannel,
        at: DateTime<Utc>,
    ) -> Result<DeliveryAttempt>;
    /// 写入终态并 attempts + 1
    async fn record_outcome(
        &self,
        notification_id: Uuid,
        channel: DeliveryChannel,
        outcome: &DeliveryOutcome,
    ) -> Result<DeliveryAttempt>;
    async fn list_by_notification(&self, notification_id: Uuid) -> Result<Vec<DeliveryAttempt>>;
    /// 返回 (已送达数, 失败数, 平均送达耗时毫秒)
    async fn delivery_summary(&self, user_id: &str) -> Result<(i64, i64, f64)>;
}

/// 模板仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TemplateRepositoryTrait: Send + Sync {
    async fn create(&self, template: &NotificationTemplate) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<NotificationTemplate>>;
    async fn get_by_name(&self, name: &str) -> Result<Option<NotificationTemplate>>;
    async fn list(&self, active_only: bool) -> Result<Vec<NotificationTemplate>>;
    async fn update(&self, template: &NotificationTemplate) -> Result<()>;
    async fn deactivate(&self, id: Uuid) -> Result<bool>;
}

/// 偏好仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PreferenceRepositoryTrait: Send + Sync {
    async fn get(&self, user_id: &str) -> Result<Option<NotificationPreferences>>;
    /// 不存在时插入给定默认值，存在时原样返回
    async fn get_or_create(
        &self,
        defaults: &NotificationPreferences,
    ) -> Result<NotificationPreferences>;
    /// 按 user_id 原子插入或更新
    async fn upsert(&self, prefs: &NotificationPreferences) -> Result<NotificationPreferences>;
}

/// 定时通知仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScheduleRepositoryTrait: Send + Sync {
    async fn create(&self, schedule: &ScheduledNotification) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<ScheduledNotification>>;
    async fn list_by_user(
        &self,
        user_id: &str,
        active_only: bool,
    ) -> Result<Vec<ScheduledNotification>>;
    async fn update(&self, schedule: &ScheduledNotification) -> Result<()>;
    /// 到期的有效定时，按 scheduled_at 升序，最多 limit 条
    async fn due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<ScheduledNotification>>;
    /// 记录一次执行：execution_count + 1，next 为空时停用
    async fn record_execution(
        &self,
        id: Uuid,
        executed_at: DateTime<Utc>,
        next: Option<DateTime<Utc>>,
    ) -> Result<()>;
    async fn deactivate(&self, id: Uuid) -> Result<bool>;
}

/// 批量任务仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BatchRepositoryTrait: Send + Sync {
    async fn create(&self, batch: &NotificationBatch) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<NotificationBatch>>;
    /// 校验状态转换合法后写入，返回更新后的任务
    async fn transition(&self, id: Uuid, progress: &BatchProgress) -> Result<NotificationBatch>;
}

/// 推送订阅仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PushSubscriptionRepositoryTrait: Send + Sync {
    /// 按 (user_id, endpoint) 插入或刷新密钥并重新激活
    async fn upsert(&self, subscription: &PushSubscription) -> Result<PushSubscription>;
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<PushSubscription>>;
    async fn list_active(&self, user_id: &str) -> Result<Vec<PushSubscription>>;
    async fn deactivate(&self, id: Uuid) -> Result<()>;
    async fn touch(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;
    async fn delete(&self, user_id: &str, endpoint: &str) -> Result<bool>;
}
