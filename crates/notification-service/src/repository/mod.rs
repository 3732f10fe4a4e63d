//! 数据库仓储层
//!
//! 提供通知引擎全部实体的数据访问接口，封装 SQL 操作细节。
//!
//! ## 设计原则
//!
//! - 仓储只负责数据持久化，不包含业务逻辑
//! - Postgres 实现使用 SQLx，内存实现使用 DashMap，两者语义一致
//! - 定义 trait 接口以支持 mock 测试

mod batch_repo;
mod delivery_repo;
mod memory;
mod notification_repo;
mod preference_repo;
mod push_subscription_repo;
mod schedule_repo;
mod template_repo;
mod traits;

pub use batch_repo::BatchRepository;
pub use delivery_repo::DeliveryAttemptRepository;
pub use memory::{MemoryStore, MemoryTable};
pub use notification_repo::NotificationRepository;
pub use preference_repo::PreferenceRepository;
pub use push_subscription_repo::PushSubscriptionRepository;
pub use schedule_repo::ScheduleRepository;
pub use template_repo::TemplateRepository;
pub use traits::*;
