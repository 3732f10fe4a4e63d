//! 推送订阅服务

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use super::dto::SubscribePushRequest;
use crate::error::Result;
use crate::models::PushSubscription;
use crate::repository::PushSubscriptionRepositoryTrait;

pub struct PushSubscriptionService {
    subscriptions: Arc<dyn PushSubscriptionRepositoryTrait>,
}

impl PushSubscriptionService {
    pub fn new(subscriptions: Arc<dyn PushSubscriptionRepositoryTrait>) -> Self {
        Self { subscriptions }
    }

    /// 订阅；同一 endpoint 重复订阅时刷新密钥并重新激活
    #[instrument(skip(self, request), fields(endpoint = %request.endpoint))]
    pub async fn subscribe(
        &self,
        user_id: &str,
        request: SubscribePushRequest,
    ) -> Result<PushSubscription> {
        request.validate()?;
        let now = Utc::now();

        let subscription = self
            .subscriptions
            .upsert(&PushSubscription {
                id: Uuid::now_v7(),
                user_id: user_id.to_string(),
                endpoint: request.endpoint,
                p256dh: request.keys.p256dh,
                auth: request.keys.auth,
                user_agent: request.user_agent,
                is_active: true,
                last_used_at: None,
                created_at: now,
                updated_at: now,
            })
            .await?;

        info!(user_id = %user_id, subscription_id = %subscription.id, "推送订阅已保存");
        Ok(subscription)
    }

    /// 取消订阅，返回是否存在
    pub async fn unsubscribe(&self, user_id: &str, endpoint: &str) -> Result<bool> {
        let removed = self.subscriptions.delete(user_id, endpoint).await?;
        if removed {
            info!(user_id = %user_id, "推送订阅已删除");
        }
        Ok(removed)
    }

    pub async fn list(&self, user_id: &str) -> Result<Vec<PushSubscription>> {
        self.subscriptions.list_by_user(user_id).await
    }
}
