//! 实时推送渠道
//!
//! 尽力而为：用户没有在线连接时同样视为成功，通知仍可在站内列表看到。

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;

use super::{ChannelResult, NotificationChannel};
use crate::error::Result;
use crate::models::{DeliveryChannel, Notification};
use crate::notification::dispatcher::Broadcaster;

pub struct WebsocketChannel {
    broadcaster: Arc<dyn Broadcaster>,
}

impl WebsocketChannel {
    pub fn new(broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self { broadcaster }
    }
}

#[async_trait]
impl NotificationChannel for WebsocketChannel {
    fn channel_type(&self) -> DeliveryChannel {
        DeliveryChannel::Websocket
    }

    fn name(&self) -> &str {
        "实时推送"
    }

    async fn send(&self, notification: &Notification) -> Result<ChannelResult> {
        let start = Instant::now();
        let reached = self.broadcaster.send_to_user(notification).await?;

        Ok(ChannelResult::delivered(
            DeliveryChannel::Websocket,
            None,
            start.elapsed().as_millis() as u64,
        )
        .with_metadata(json!({ "connections": reached })))
    }
}
