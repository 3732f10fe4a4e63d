//! 通知核心
//!
//! - `resolver`: 按偏好与免打扰时段决定有效渠道
//! - `template`: `{{variable}}` 模板渲染与合并
//! - `dispatcher` / `channels`: 多渠道投递与投递记录
//! - `quiet_hours`: 时区感知的免打扰时段计算

pub mod channels;
pub mod dispatcher;
pub mod quiet_hours;
pub mod resolver;
pub mod template;
pub mod types;

pub use channels::{
    EmailChannel, InAppChannel, NotificationChannel, PushChannel, SmsChannel, WebsocketChannel,
};
pub use dispatcher::{Broadcaster, DeliveryDispatcher, NoopBroadcaster};
pub use quiet_hours::QuietHours;
pub use resolver::{ChannelResolver, ResolvedChannels};
pub use template::{RenderedContent, TemplateEngine, TemplateOverrides};
pub use types::{ChannelResult, DeliveryReport};
