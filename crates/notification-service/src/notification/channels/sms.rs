//! 短信渠道
//!
//! 未接入短信服务商，投递总是失败并记录原因。

use async_trait::async_trait;
use tracing::debug;

use super::{ChannelResult, NotificationChannel};
use crate::error::Result;
use crate::models::{DeliveryChannel, Notification};

pub const SMS_NOT_IMPLEMENTED: &str = "not implemented";

#[derive(Debug, Default, Clone, Copy)]
pub struct SmsChannel;

#[async_trait]
impl NotificationChannel for SmsChannel {
    fn channel_type(&self) -> DeliveryChannel {
        DeliveryChannel::Sms
    }

    fn name(&self) -> &str {
        "短信"
    }

    async fn send(&self, notification: &Notification) -> Result<ChannelResult> {
        debug!(notification_id = %notification.id, "短信渠道未实现");
        Ok(ChannelResult::failed(DeliveryChannel::Sms, SMS_NOT_IMPLEMENTED, 0))
    }
}
