//! Web Push 推送渠道
//!
//! 向用户所有有效订阅并发发送；推送服务判定失效的订阅会被停用。
//! 至少一个订阅发送成功即视为送达。

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use serde_json::json;
use tracing::{debug, warn};

use super::{ChannelResult, NotificationChannel};
use crate::error::Result;
use crate::models::{DeliveryChannel, Notification, PushSubscription};
use crate::repository::PushSubscriptionRepositoryTrait;
use crate::transport::{PushError, PushPayload, PushTransport};

pub const NO_ACTIVE_SUBSCRIPTIONS: &str = "no active subscriptions";

pub struct PushChannel {
    subscriptions: Arc<dyn PushSubscriptionRepositoryTrait>,
    transport: Arc<dyn PushTransport>,
}

impl PushChannel {
    pub fn new(
        subscriptions: Arc<dyn PushSubscriptionRepositoryTrait>,
        transport: Arc<dyn PushTransport>,
    ) -> Self {
        Self {
            subscriptions,
            transport,
        }
    }

    /// 构建推送载荷，icon / badge / actionUrl 取自 metadata
    pub fn build_payload(notification: &Notification) -> PushPayload {
        PushPayload {
            title: notification.title.clone(),
            body: notification.message.clone(),
            icon: notification.metadata_str("icon").map(str::to_string),
            badge: notification.metadata_str("badge").map(str::to_string),
            data: json!({
                "notificationId": notification.id,
                "type": notification.notification_type,
                "category": notification.category,
                "actionUrl": notification.metadata_str("actionUrl"),
            }),
        }
    }

    async fn send_one(
        &self,
        subscription: &PushSubscription,
        payload: &PushPayload,
    ) -> std::result::Result<(), PushError> {
        let result = self
            .transport
            .send(&subscription.endpoint, &subscription.keys(), payload)
            .await;

        // 订阅状态维护失败不影响本次结果
        match &result {
            Ok(()) => {
                if let Err(e) = self.subscriptions.touch(subscription.id, Utc::now()).await {
                    warn!(subscription_id = %subscription.id, error = %e, "更新订阅使用时间失败");
                }
            }
            Err(PushError::Gone) => {
                debug!(subscription_id = %subscription.id, "推送订阅已失效，停用");
                if let Err(e) = self.subscriptions.deactivate(subscription.id).await {
                    warn!(subscription_id = %subscription.id, error = %e, "停用推送订阅失败");
                }
            }
            Err(e) => {
                warn!(subscription_id = %subscription.id, error = %e, "推送发送失败");
            }
        }
        result
    }
}

#[async_trait]
impl NotificationChannel for PushChannel {
    fn channel_type(&self) -> DeliveryChannel {
        DeliveryChannel::Push
    }

    fn name(&self) -> &str {
        "推送"
    }

    async fn send(&self, notification: &Notification) -> Result<ChannelResult> {
        let start = Instant::now();
        let subscriptions = self.subscriptions.list_active(&notification.user_id).await?;

        if subscriptions.is_empty() {
            return Ok(ChannelResult::failed(
                DeliveryChannel::Push,
                NO_ACTIVE_SUBSCRIPTIONS,
                start.elapsed().as_millis() as u64,
            ));
        }

        let payload = Self::build_payload(notification);
        let results = join_all(
            subscriptions
                .iter()
                .map(|subscription| self.send_one(subscription, &payload)),
        )
        .await;

        let sent = results.iter().filter(|r| r.is_ok()).count();
        let gone = results
            .iter()
            .filter(|r| r.as_ref().is_err_and(PushError::is_gone))
            .count();
        let failed = results.len() - sent;
        let metadata = json!({ "sent": sent, "failed": failed, "deactivated": gone });
        let elapsed = start.elapsed().as_millis() as u64;

        if sent > 0 {
            Ok(ChannelResult::delivered(DeliveryChannel::Push, None, elapsed).with_metadata(metadata))
        } else {
            let reason = results
                .into_iter()
                .find_map(|r| r.err())
                .map(|e| e.to_string())
                .unwrap_or_else(|| NO_ACTIVE_SUBSCRIPTIONS.to_string());
            Ok(ChannelResult::failed(DeliveryChannel::Push, reason, elapsed).with_metadata(metadata))
        }
    }
}
