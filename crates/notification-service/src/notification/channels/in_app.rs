//! 站内信渠道
//!
//! 通知写库后即在站内列表可见，这里只把状态推进到 delivered。

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use super::{ChannelResult, NotificationChannel};
use crate::error::Result;
use crate::models::{DeliveryChannel, Notification, NotificationStatus};
use crate::repository::NotificationRepositoryTrait;

pub struct InAppChannel {
    notifications: Arc<dyn NotificationRepositoryTrait>,
}

impl InAppChannel {
    pub fn new(notifications: Arc<dyn NotificationRepositoryTrait>) -> Self {
        Self { notifications }
    }
}

#[async_trait]
impl NotificationChannel for InAppChannel {
    fn channel_type(&self) -> DeliveryChannel {
        DeliveryChannel::InApp
    }

    fn name(&self) -> &str {
        "站内信"
    }

    async fn send(&self, notification: &Notification) -> Result<ChannelResult> {
        let start = Instant::now();
        self.notifications
            .update_delivery_status(notification.id, NotificationStatus::Delivered)
            .await?;

        Ok(ChannelResult::delivered(
            DeliveryChannel::InApp,
            None,
            start.elapsed().as_millis() as u64,
        ))
    }
}
