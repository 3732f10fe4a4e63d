//! 服务层
//!
//! 组合仓储、渲染、渠道解析与投递，对外提供通知引擎的全部操作。

pub mod batch_service;
pub mod dto;
pub mod engine;
pub mod notification_service;
pub mod preference_service;
pub mod push_subscription_service;
pub mod schedule_service;
pub mod template_service;

pub use batch_service::BatchService;
pub use engine::{Adapters, NotificationEngine, Stores};
pub use notification_service::NotificationService;
pub use preference_service::PreferenceService;
pub use push_subscription_service::PushSubscriptionService;
pub use schedule_service::ScheduleService;
pub use template_service::TemplateService;
