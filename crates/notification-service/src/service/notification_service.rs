//! 通知服务
//!
//! 通知的创建与用户侧管理。创建流程：
//!
//! 1. 请求校验 -> 2. 读取偏好 -> 3. 模板渲染或字面量 -> 4. 渠道解析
//!    -> 5. 持久化 -> 6. 后台投递（免打扰延后时交给 scheduler）
//!
//! 用户侧的已读、归档、删除等操作完成后通过 Broadcaster 同步到在线连接。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use notify_shared::observability::metrics as app_metrics;
use serde_json::json;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::dto::{BulkOperationRequest, BulkOperationResult, CreateNotificationRequest};
use crate::error::{NotificationError, Result};
use crate::models::{
    BulkAction, DeliveryAttempt, DeliveryChannel, Notification, NotificationCategory,
    NotificationPreferences, NotificationPriority, NotificationQuery, NotificationStats,
    NotificationStatus, NotificationType, Page,
};
use crate::notification::resolver::DEFAULT_CHANNELS;
use crate::notification::{
    Broadcaster, ChannelResolver, DeliveryDispatcher, DeliveryReport, TemplateEngine,
    TemplateOverrides,
};
use crate::realtime::ServerEvent;
use crate::repository::{
    DeliveryAttemptRepositoryTrait, NotificationRepositoryTrait, PreferenceRepositoryTrait,
    TemplateRepositoryTrait,
};

/// 通知服务
pub struct NotificationService {
    notifications: Arc<dyn NotificationRepositoryTrait>,
    attempts: Arc<dyn DeliveryAttemptRepositoryTrait>,
    templates: Arc<dyn TemplateRepositoryTrait>,
    preferences: Arc<dyn PreferenceRepositoryTrait>,
    dispatcher: Arc<DeliveryDispatcher>,
    broadcaster: Arc<dyn Broadcaster>,
    resolver: ChannelResolver,
    engine: TemplateEngine,
}

impl NotificationService {
    pub fn new(
        notifications: Arc<dyn NotificationRepositoryTrait>,
        attempts: Arc<dyn DeliveryAttemptRepositoryTrait>,
        templates: Arc<dyn TemplateRepositoryTrait>,
        preferences: Arc<dyn PreferenceRepositoryTrait>,
        dispatcher: Arc<DeliveryDispatcher>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            notifications,
            attempts,
            templates,
            preferences,
            dispatcher,
            broadcaster,
            resolver: ChannelResolver::new(),
            engine: TemplateEngine::new(),
        }
    }

    // ==================== 创建 ====================

    /// 创建通知并在后台投递
    ///
    /// 投递失败不影响返回值，结果记录在投递记录中
    #[instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn create(&self, request: CreateNotificationRequest) -> Result<Notification> {
        let notification = self.persist(request, None, Utc::now()).await?;
        if notification.scheduled_at.is_none() {
            self.dispatcher.deliver_async(notification.clone());
        }
        Ok(notification)
    }

    /// 创建通知并等待投递完成；延后投递的通知不产生报告
    #[instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn create_and_deliver(
        &self,
        request: CreateNotificationRequest,
    ) -> Result<(Notification, Option<DeliveryReport>)> {
        let notification = self.persist(request, None, Utc::now()).await?;
        if notification.scheduled_at.is_some() {
            return Ok((notification, None));
        }

        let report = self.dispatcher.deliver(&notification).await;
        Ok((notification, Some(report)))
    }

    /// 批量任务中的单个收件人，投递在后台进行
    pub async fn create_for_batch(
        &self,
        request: CreateNotificationRequest,
        batch_id: Uuid,
    ) -> Result<Notification> {
        let notification = self.persist(request, Some(batch_id), Utc::now()).await?;
        if notification.scheduled_at.is_none() {
            self.dispatcher.deliver_async(notification.clone());
        }
        Ok(notification)
    }

    /// 校验、渲染、解析渠道并写库，不投递
    async fn persist(
        &self,
        request: CreateNotificationRequest,
        batch_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Notification> {
        request.check(now)?;
        let prefs = self.preferences.get(&request.user_id).await?;
        let notification = self.build(request, prefs.as_ref(), batch_id, now).await?;

        self.notifications.create(&notification).await?;
        app_metrics::record_notification_created(
            notification.category.as_str(),
            notification.priority.as_str(),
            notification.scheduled_at.is_some(),
        );

        info!(
            notification_id = %notification.id,
            user_id = %notification.user_id,
            channels = ?notification.channels,
            deferred_until = ?notification.scheduled_at,
            "通知已创建"
        );
        Ok(notification)
    }

    async fn build(
        &self,
        request: CreateNotificationRequest,
        prefs: Option<&NotificationPreferences>,
        batch_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Notification> {
        let (title, message, notification_type, category, priority, channels, metadata) =
            match request.template_id {
                Some(template_id) => {
                    let template = self
                        .templates
                        .get(template_id)
                        .await?
                        .ok_or(NotificationError::TemplateNotFound(template_id))?;
                    if !template.is_active {
                        return Err(NotificationError::TemplateInactive(template_id));
                    }

                    let rendered = self.engine.apply(
                        &template,
                        request.template_variables.as_ref(),
                        TemplateOverrides {
                            notification_type: request.notification_type,
                            category: request.category,
                            priority: request.priority,
                            channels: request.channels.clone(),
                            metadata: request.metadata.clone(),
                        },
                    );
                    (
                        rendered.title,
                        rendered.message,
                        rendered.notification_type,
                        rendered.category,
                        rendered.priority,
                        rendered.channels,
                        rendered.metadata,
                    )
                }
                None => {
                    let category = request.category.unwrap_or(NotificationCategory::System);
                    let priority = self
                        .resolver
                        .resolve_priority(request.priority, category, prefs);
                    let channels = request
                        .channels
                        .clone()
                        .filter(|c| !c.is_empty())
                        .unwrap_or_else(|| DEFAULT_CHANNELS.to_vec());
                    (
                        request.title.clone().unwrap_or_default(),
                        request.message.clone().unwrap_or_default(),
                        request.notification_type.unwrap_or(NotificationType::Info),
                        category,
                        priority,
                        channels,
                        request.metadata.clone().unwrap_or_else(|| json!({})),
                    )
                }
            };

        let resolved = self
            .resolver
            .resolve(&channels, category, priority, prefs, now);

        Ok(Notification {
            id: Uuid::now_v7(),
            user_id: request.user_id,
            title,
            message,
            notification_type,
            category,
            priority: resolved.priority,
            status: NotificationStatus::Pending,
            channels: resolved.channels,
            metadata,
            scheduled_at: resolved.defer_until,
            expires_at: request.expires_at,
            template_id: request.template_id,
            template_variables: request.template_variables,
            is_read: false,
            is_archived: false,
            read_at: None,
            archived_at: None,
            batch_id,
            created_at: now,
            updated_at: now,
        })
    }

    /// 投递到期的免打扰延后通知，返回投递条数
    ///
    /// 已过期的通知直接标记为失败
    pub async fn deliver_due_deferred(&self, now: DateTime<Utc>, limit: i64) -> Result<usize> {
        let due = self.notifications.list_due_deferred(now, limit).await?;
        let mut delivered = 0;

        for notification in due {
            if notification.is_expired(now) {
                debug!(notification_id = %notification.id, "延后通知已过期");
                self.notifications
                    .update_delivery_status(notification.id, NotificationStatus::Failed)
                    .await?;
                continue;
            }

            self.dispatcher.deliver(&notification).await;
            delivered += 1;
        }

        if delivered > 0 {
            info!(count = delivered, "已投递延后通知");
        }
        Ok(delivered)
    }

    /// 测试通知：按偏好过滤渠道但忽略免打扰，同步返回投递报告
    #[instrument(skip(self))]
    pub async fn send_test(
        &self,
        user_id: &str,
        channels: Option<Vec<DeliveryChannel>>,
    ) -> Result<DeliveryReport> {
        let now = Utc::now();
        let prefs = self.preferences.get(user_id).await?;
        let channels = channels
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| DeliveryChannel::ALL.to_vec());
        let resolved = self.resolver.resolve(
            &channels,
            NotificationCategory::System,
            NotificationPriority::Low,
            prefs.as_ref(),
            now,
        );

        let notification = Notification {
            id: Uuid::now_v7(),
            user_id: user_id.to_string(),
            title: "测试通知".to_string(),
            message: "这是一条测试通知，用于确认各渠道是否可达。".to_string(),
            notification_type: NotificationType::Info,
            category: NotificationCategory::System,
            priority: resolved.priority,
            status: NotificationStatus::Pending,
            channels: resolved.channels,
            metadata: json!({ "test": true }),
            scheduled_at: None,
            expires_at: None,
            template_id: None,
            template_variables: None,
            is_read: false,
            is_archived: false,
            read_at: None,
            archived_at: None,
            batch_id: None,
            created_at: now,
            updated_at: now,
        };

        self.notifications.create(&notification).await?;
        Ok(self.dispatcher.deliver(&notification).await)
    }

    // ==================== 查询 ====================

    pub async fn list(&self, user_id: &str, query: &NotificationQuery) -> Result<Page<Notification>> {
        let (items, total) = self.notifications.list(user_id, query).await?;
        Ok(Page {
            items,
            total,
            page: query.page(),
            limit: query.limit(),
        })
    }

    pub async fn get(&self, user_id: &str, id: Uuid) -> Result<Notification> {
        self.notifications
            .get_for_user(user_id, id)
            .await?
            .ok_or(NotificationError::NotificationNotFound(id))
    }

    pub async fn unread_count(&self, user_id: &str) -> Result<i64> {
        self.notifications.unread_count(user_id).await
    }

    /// 统计：计数来自通知，投递率与平均时延来自投递记录
    pub async fn stats(&self, user_id: &str) -> Result<NotificationStats> {
        let mut stats = self.notifications.stats(user_id).await?;
        let (delivered, failed, average_latency_ms) =
            self.attempts.delivery_summary(user_id).await?;

        let finished = delivered + failed;
        stats.delivery_rate = if finished > 0 {
            delivered as f64 / finished as f64
        } else {
            0.0
        };
        stats.average_delivery_latency_ms = average_latency_ms;
        Ok(stats)
    }

    pub async fn delivery_attempts(
        &self,
        user_id: &str,
        notification_id: Uuid,
    ) -> Result<Vec<DeliveryAttempt>> {
        self.get(user_id, notification_id).await?;
        self.attempts.list_by_notification(notification_id).await
    }

    // ==================== 用户操作 ====================

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn mark_read(&self, user_id: &str, ids: &[Uuid]) -> Result<u64> {
        let changed = self.notifications.mark_read(user_id, ids, Utc::now()).await?;
        if changed > 0 {
            self.broadcaster
                .emit_to_user(
                    user_id,
                    ServerEvent::NotificationsMarkedRead {
                        notification_ids: ids.to_vec(),
                    },
                )
                .await;
        }
        Ok(changed)
    }

    /// 全部标记为已读，重复调用返回 0
    #[instrument(skip(self))]
    pub async fn mark_all_read(&self, user_id: &str) -> Result<u64> {
        let count = self.notifications.mark_all_read(user_id, Utc::now()).await?;
        if count > 0 {
            self.broadcaster
                .emit_to_user(user_id, ServerEvent::AllNotificationsRead { count })
                .await;
        }
        Ok(count)
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn archive(&self, user_id: &str, ids: &[Uuid]) -> Result<u64> {
        let changed = self.notifications.archive(user_id, ids, Utc::now()).await?;
        if changed > 0 {
            self.broadcaster
                .emit_to_user(
                    user_id,
                    ServerEvent::NotificationsArchived {
                        notification_ids: ids.to_vec(),
                    },
                )
                .await;
        }
        Ok(changed)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, user_id: &str, id: Uuid) -> Result<()> {
        let deleted = self.notifications.delete(user_id, &[id]).await?;
        if deleted == 0 {
            return Err(NotificationError::NotificationNotFound(id));
        }

        self.broadcaster
            .emit_to_user(user_id, ServerEvent::NotificationDeleted { notification_id: id })
            .await;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn clear_all(&self, user_id: &str) -> Result<u64> {
        let count = self.notifications.clear_all(user_id).await?;
        if count > 0 {
            self.broadcaster
                .emit_to_user(user_id, ServerEvent::NotificationsCleared { count })
                .await;
        }
        Ok(count)
    }

    /// 批量操作；不属于该用户的 id 被忽略
    #[instrument(skip(self, request), fields(action = ?request.action, count = request.notification_ids.len()))]
    pub async fn bulk(
        &self,
        user_id: &str,
        request: &BulkOperationRequest,
    ) -> Result<BulkOperationResult> {
        request.check()?;
        let ids = &request.notification_ids;
        let now = Utc::now();

        let affected = match request.action {
            BulkAction::MarkAsRead => self.notifications.mark_read(user_id, ids, now).await?,
            BulkAction::MarkAsUnread => self.notifications.mark_unread(user_id, ids).await?,
            BulkAction::Archive => self.notifications.archive(user_id, ids, now).await?,
            BulkAction::Delete => self.notifications.delete(user_id, ids).await?,
            BulkAction::UpdatePriority => {
                let priority = request.priority.ok_or_else(|| {
                    NotificationError::Validation("缺少 priority".to_string())
                })?;
                self.notifications
                    .update_priority(user_id, ids, priority)
                    .await?
            }
        };

        if affected < ids.len() as u64 {
            warn!(
                user_id = %user_id,
                requested = ids.len(),
                affected,
                "部分通知不存在或状态未变化"
            );
        }

        self.broadcaster
            .emit_to_user(
                user_id,
                ServerEvent::BulkOperationCompleted {
                    action: request.action,
                    notification_ids: ids.clone(),
                    affected,
                },
            )
            .await;

        Ok(BulkOperationResult {
            action: request.action,
            requested: ids.len(),
            affected,
        })
    }
}
