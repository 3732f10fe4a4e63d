//! 投递分发器
//!
//! 对一条已持久化的通知按其有效渠道并发投递：
//! 每个渠道先写入 pending 投递记录，再在超时保护下发送，最后写回终态。
//! 分发器内不做重试，失败原因记录在投递记录上。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use notify_shared::observability::metrics as app_metrics;
use tracing::{debug, error, info, warn};

use super::channels::NotificationChannel;
use super::types::{ChannelResult, DeliveryReport};
use crate::error::Result;
use crate::models::{DeliveryChannel, Notification, NotificationStatus};
use crate::realtime::ServerEvent;
use crate::repository::{DeliveryAttemptRepositoryTrait, NotificationRepositoryTrait};

pub const CHANNEL_NOT_REGISTERED: &str = "channel not registered";

/// 实时推送输出端口
///
/// 分发器与服务层通过它把事件交给在线连接，由实时网关实现。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// 推送新通知到用户的所有连接（含分类/类型订阅镜像），返回到达的连接数
    async fn send_to_user(&self, notification: &Notification) -> Result<usize>;

    /// 向用户的所有连接发送任意事件，返回到达的连接数
    async fn emit_to_user(&self, user_id: &str, event: ServerEvent) -> usize;
}

/// 无在线连接的 Broadcaster，用于没有实时网关的场景
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBroadcaster;

#[async_trait]
impl Broadcaster for NoopBroadcaster {
    async fn send_to_user(&self, _notification: &Notification) -> Result<usize> {
        Ok(0)
    }

    async fn emit_to_user(&self, _user_id: &str, _event: ServerEvent) -> usize {
        0
    }
}

/// 投递分发器
pub struct DeliveryDispatcher {
    channels: HashMap<DeliveryChannel, Arc<dyn NotificationChannel>>,
    notifications: Arc<dyn NotificationRepositoryTrait>,
    attempts: Arc<dyn DeliveryAttemptRepositoryTrait>,
    channel_timeout: Duration,
}

impl DeliveryDispatcher {
    pub fn new(
        notifications: Arc<dyn NotificationRepositoryTrait>,
        attempts: Arc<dyn DeliveryAttemptRepositoryTrait>,
        channel_timeout: Duration,
    ) -> Self {
        Self {
            channels: HashMap::new(),
            notifications,
            attempts,
            channel_timeout,
        }
    }

    /// 注册渠道，同类型渠道后注册的覆盖先注册的
    pub fn register_channel(&mut self, channel: Arc<dyn NotificationChannel>) {
        info!(channel = channel.name(), "注册通知渠道");
        self.channels.insert(channel.channel_type(), channel);
    }

    pub fn with_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.register_channel(channel);
        self
    }

    pub fn has_channel(&self, channel: DeliveryChannel) -> bool {
        self.channels.contains_key(&channel)
    }

    /// 后台投递，调用方不等待结果
    pub fn deliver_async(self: &Arc<Self>, notification: Notification) {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            dispatcher.deliver(&notification).await;
        });
    }

    /// 投递一条通知到其全部渠道
    ///
    /// 渠道失败不会以错误返回，只体现在报告与投递记录中
    pub async fn deliver(&self, notification: &Notification) -> DeliveryReport {
        let start = Instant::now();

        let channel_results = join_all(
            notification
                .channels
                .iter()
                .map(|channel| self.deliver_channel(notification, *channel)),
        )
        .await;

        let report = DeliveryReport::new(
            notification.id,
            channel_results,
            start.elapsed().as_millis() as u64,
        );

        // 站内信送达时已经把状态推进到 delivered
        let final_status = if report.success_count() == 0 {
            Some(NotificationStatus::Failed)
        } else if !report.delivered_on(DeliveryChannel::InApp) {
            Some(NotificationStatus::Sent)
        } else {
            None
        };
        if let Some(status) = final_status {
            if let Err(e) = self
                .notifications
                .update_delivery_status(notification.id, status)
                .await
            {
                error!(
                    notification_id = %notification.id,
                    status = status.as_str(),
                    error = %e,
                    "回写通知状态失败"
                );
            }
        }

        self.log_result(notification, &report);
        report
    }

    async fn deliver_channel(
        &self,
        notification: &Notification,
        channel: DeliveryChannel,
    ) -> ChannelResult {
        if let Err(e) = self
            .attempts
            .upsert_pending(notification.id, channel, Utc::now())
            .await
        {
            warn!(
                notification_id = %notification.id,
                channel = channel.as_str(),
                error = %e,
                "写入待投递记录失败"
            );
        }

        let start = Instant::now();
        let result = match self.channels.get(&channel) {
            None => ChannelResult::failed(channel, CHANNEL_NOT_REGISTERED, 0),
            Some(sender) => {
                match tokio::time::timeout(self.channel_timeout, sender.send(notification)).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(e)) => ChannelResult::failed(
                        channel,
                        e.to_string(),
                        start.elapsed().as_millis() as u64,
                    ),
                    Err(_) => ChannelResult::failed(
                        channel,
                        format!("timeout after {}ms", self.channel_timeout.as_millis()),
                        start.elapsed().as_millis() as u64,
                    ),
                }
            }
        };

        app_metrics::record_channel_delivery(
            channel.as_str(),
            result.status.as_str(),
            start.elapsed().as_secs_f64(),
        );

        if let Err(e) = self
            .attempts
            .record_outcome(notification.id, channel, &result.to_outcome(Utc::now()))
            .await
        {
            warn!(
                notification_id = %notification.id,
                channel = channel.as_str(),
                error = %e,
                "写入投递结果失败"
            );
        }

        if result.is_delivered() {
            debug!(
                notification_id = %notification.id,
                channel = channel.as_str(),
                duration_ms = result.duration_ms,
                "渠道投递成功"
            );
        } else {
            warn!(
                notification_id = %notification.id,
                channel = channel.as_str(),
                reason = ?result.failure_reason,
                "渠道投递失败"
            );
        }
        result
    }

    /// 记录投递汇总日志
    fn log_result(&self, notification: &Notification, report: &DeliveryReport) {
        let success_count = report.success_count();
        let failure_count = report.failure_count();
        let total = report.channel_results.len();

        if failure_count == 0 {
            info!(
                notification_id = %notification.id,
                user_id = %notification.user_id,
                success_count,
                total,
                duration_ms = report.duration_ms,
                "通知投递完成（全部成功）"
            );
        } else if report.is_partial_success() {
            warn!(
                notification_id = %notification.id,
                user_id = %notification.user_id,
                success_count,
                failure_count,
                total,
                duration_ms = report.duration_ms,
                "通知投递完成（部分成功）"
            );
        } else {
            error!(
                notification_id = %notification.id,
                user_id = %notification.user_id,
                failure_count,
                total,
                duration_ms = report.duration_ms,
                "通知投递完成（全部失败）"
            );
        }
    }
}
