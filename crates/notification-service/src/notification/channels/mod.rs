//! 通知渠道实现
//!
//! 定义通知渠道 trait 并提供各渠道的具体实现。
//!
//! ## 支持的渠道
//!
//! - **InApp**: 站内信，写回通知状态即完成
//! - **Websocket**: 通过 Broadcaster 推送到在线连接，尽力而为
//! - **Email**: HTML 邮件
//! - **Push**: Web Push，按订阅并发发送
//! - **Sms**: 未实现，投递总是失败

pub mod email;
pub mod in_app;
pub mod push;
pub mod sms;
pub mod websocket;

pub use email::EmailChannel;
pub use in_app::InAppChannel;
pub use push::PushChannel;
pub use sms::SmsChannel;
pub use websocket::WebsocketChannel;

use async_trait::async_trait;

use super::types::ChannelResult;
use crate::error::Result;
use crate::models::{DeliveryChannel, Notification};

/// 通知渠道 trait
///
/// 业务上的发送失败应返回 `ChannelResult::failed`；
/// 返回 Err 表示渠道自身异常，由分发器记为失败。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// 渠道类型标识
    fn channel_type(&self) -> DeliveryChannel;

    /// 渠道名称（用于日志）
    fn name(&self) -> &str;

    /// 发送通知
    async fn send(&self, notification: &Notification) -> Result<ChannelResult>;
}
