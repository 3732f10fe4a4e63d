//! 通知服务领域模型
//!
//! 包含通知、投递记录、模板、偏好、定时、批量与推送订阅等实体

pub mod batch;
pub mod enums;
pub mod notification;
pub mod preferences;
pub mod push_subscription;
pub mod query;
pub mod schedule;
pub mod template;

// 重新导出常用类型
pub use batch::{BatchProgress, NotificationBatch};
pub use enums::{
    BatchStatus, BulkAction, DeliveryChannel, DeliveryStatus, NotificationCategory,
    NotificationPriority, NotificationStatus, NotificationType, RecurringInterval,
};
pub use notification::{DeliveryAttempt, DeliveryOutcome, Notification, NotificationStats};
pub use preferences::{CategoryPreference, NotificationPreferences};
pub use push_subscription::{PushKeys, PushSubscription};
pub use query::{NotificationQuery, Page, SortField, SortOrder};
pub use schedule::{RecurringRule, ScheduledNotification};
pub use template::NotificationTemplate;
