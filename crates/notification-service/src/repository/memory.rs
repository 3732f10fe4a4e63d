//! 内存仓储
//!
//! 使用 DashMap 实现的高并发内存存储，实现全部仓储接口，
//! 适用于测试和无数据库的本地开发环境。

use std::cmp::Ordering;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use uuid::Uuid;

use super::traits::{
    BatchRepositoryTrait, DeliveryAttemptRepositoryTrait, NotificationRepositoryTrait,
    PreferenceRepositoryTrait, PushSubscriptionRepositoryTrait, ScheduleRepositoryTrait,
    TemplateRepositoryTrait,
};
use crate::error::{NotificationError, Result};
use crate::models::{
    BatchProgress, BatchStatus, DeliveryAttempt, DeliveryChannel, DeliveryOutcome,
    DeliveryStatus, Notification, NotificationBatch, NotificationPreferences,
    NotificationPriority, NotificationQuery, NotificationStats, NotificationStatus,
    NotificationTemplate, PushSubscription, ScheduledNotification, SortField, SortOrder,
};

/// 通用内存表
///
/// 基于 DashMap 实现，读取返回克隆，不对外暴露锁
#[derive(Debug)]
pub struct MemoryTable<K: Eq + Hash, T> {
    data: Arc<DashMap<K, T>>,
}

impl<K: Eq + Hash + Clone, T: Clone> Default for MemoryTable<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone, T: Clone> MemoryTable<K, T> {
    pub fn new() -> Self {
        Self {
            data: Arc::new(DashMap::new()),
        }
    }

    pub fn insert(&self, key: K, value: T) {
        self.data.insert(key, value);
    }

    pub fn get(&self, key: &K) -> Option<T> {
        self.data.get(key).map(|v| v.clone())
    }

    pub fn remove(&self, key: &K) -> Option<T> {
        self.data.remove(key).map(|(_, v)| v)
    }

    /// 按条件筛选数据
    pub fn list_by<F>(&self, predicate: F) -> Vec<T>
    where
        F: Fn(&T) -> bool,
    {
        self.data
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// 对满足条件的记录执行修改，返回修改函数报告发生变化的条数
    pub fn update_where<P, F>(&self, predicate: P, mut apply: F) -> u64
    where
        P: Fn(&T) -> bool,
        F: FnMut(&mut T) -> bool,
    {
        let mut changed = 0;
        for mut entry in self.data.iter_mut() {
            if predicate(entry.value()) && apply(entry.value_mut()) {
                changed += 1;
            }
        }
        changed
    }

    /// 删除满足条件的记录，返回删除条数
    pub fn remove_where<P>(&self, predicate: P) -> u64
    where
        P: Fn(&T) -> bool,
    {
        let before = self.data.len();
        self.data.retain(|_, v| !predicate(v));
        (before - self.data.len()) as u64
    }

    pub fn count(&self) -> usize {
        self.data.len()
    }
}

/// 内存存储
///
/// 配置了已知用户后，为未知用户创建通知会失败，对应数据库中 users 外键约束。
#[derive(Default)]
pub struct MemoryStore {
    notifications: MemoryTable<Uuid, Notification>,
    attempts: MemoryTable<(Uuid, DeliveryChannel), DeliveryAttempt>,
    templates: MemoryTable<Uuid, NotificationTemplate>,
    preferences: MemoryTable<String, NotificationPreferences>,
    schedules: MemoryTable<Uuid, ScheduledNotification>,
    batches: MemoryTable<Uuid, NotificationBatch>,
    subscriptions: MemoryTable<Uuid, PushSubscription>,
    known_users: Option<DashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 启用用户存在性校验
    pub fn with_users<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known_users: Some(users.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    fn ensure_user(&self, user_id: &str) -> Result<()> {
        match &self.known_users {
            Some(users) if !users.contains(user_id) => Err(NotificationError::Internal(format!(
                "外键约束失败: user_id={user_id} 不存在"
            ))),
            _ => Ok(()),
        }
    }

    /// 通知删除后级联清理投递记录
    fn drop_orphan_attempts(&self) {
        self.attempts
            .remove_where(|a| self.notifications.get(&a.notification_id).is_none());
    }

    fn owned_by<'a>(user_id: &'a str, ids: &'a [Uuid]) -> impl Fn(&Notification) -> bool + 'a {
        move |n| n.user_id == user_id && ids.contains(&n.id)
    }

    fn matches_query(n: &Notification, query: &NotificationQuery) -> bool {
        query.notification_type.is_none_or(|t| n.notification_type == t)
            && query.category.is_none_or(|c| n.category == c)
            && query.priority.is_none_or(|p| n.priority == p)
            && query.status.is_none_or(|s| n.status == s)
            && query.is_read.is_none_or(|r| n.is_read == r)
            && query.is_archived.is_none_or(|a| n.is_archived == a)
            && query.start_date.is_none_or(|d| n.created_at >= d)
            && query.end_date.is_none_or(|d| n.created_at <= d)
    }

    fn compare(a: &Notification, b: &Notification, query: &NotificationQuery) -> Ordering {
        let primary = match query.sort_by {
            SortField::CreatedAt => a.created_at.cmp(&b.created_at),
            SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            SortField::Priority => a.priority.cmp(&b.priority),
        };
        let primary = match query.sort_order {
            SortOrder::Asc => primary,
            SortOrder::Desc => primary.reverse(),
        };
        primary.then_with(|| b.id.cmp(&a.id))
    }

    fn count_by<F>(items: &[Notification], key: F) -> HashMap<String, i64>
    where
        F: Fn(&Notification) -> &'static str,
    {
        let mut counts = HashMap::new();
        for n in items {
            *counts.entry(key(n).to_string()).or_insert(0) += 1;
        }
        counts
    }
}

// ==================== 通知 ====================

#[async_trait]
impl NotificationRepositoryTrait for MemoryStore {
    async fn create(&self, notification: &Notification) -> Result<()> {
        self.ensure_user(&notification.user_id)?;
        self.notifications
            .insert(notification.id, notification.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Notification>> {
        Ok(self.notifications.get(&id))
    }

    async fn get_for_user(&self, user_id: &str, id: Uuid) -> Result<Option<Notification>> {
        Ok(self.notifications.get(&id).filter(|n| n.user_id == user_id))
    }

    async fn list(
        &self,
        user_id: &str,
        query: &NotificationQuery,
    ) -> Result<(Vec<Notification>, i64)> {
        let mut items = self
            .notifications
            .list_by(|n| n.user_id == user_id && Self::matches_query(n, query));
        let total = items.len() as i64;

        items.sort_by(|a, b| Self::compare(a, b, query));
        let items = items
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.limit() as usize)
            .collect();

        Ok((items, total))
    }

    async fn mark_read(&self, user_id: &str, ids: &[Uuid], at: DateTime<Utc>) -> Result<u64> {
        Ok(self
            .notifications
            .update_where(Self::owned_by(user_id, ids), |n| mark_read(n, at)))
    }

    async fn mark_unread(&self, user_id: &str, ids: &[Uuid]) -> Result<u64> {
        Ok(self
            .notifications
            .update_where(Self::owned_by(user_id, ids), |n| {
                if !n.is_read {
                    return false;
                }
                n.is_read = false;
                n.read_at = None;
                if n.status == NotificationStatus::Read {
                    n.status = NotificationStatus::Delivered;
                }
                n.updated_at = Utc::now();
                true
            }))
    }

    async fn mark_all_read(&self, user_id: &str, at: DateTime<Utc>) -> Result<u64> {
        Ok(self
            .notifications
            .update_where(|n| n.user_id == user_id, |n| mark_read(n, at)))
    }

    async fn archive(&self, user_id: &str, ids: &[Uuid], at: DateTime<Utc>) -> Result<u64> {
        Ok(self
            .notifications
            .update_where(Self::owned_by(user_id, ids), |n| {
                if n.is_archived {
                    return false;
                }
                n.is_archived = true;
                n.archived_at = Some(at);
                if n.status != NotificationStatus::Pending {
                    n.status = NotificationStatus::Archived;
                }
                n.updated_at = at;
                true
            }))
    }

    async fn update_priority(
        &self,
        user_id: &str,
        ids: &[Uuid],
        priority: NotificationPriority,
    ) -> Result<u64> {
        Ok(self
            .notifications
            .update_where(Self::owned_by(user_id, ids), |n| {
                n.priority = priority;
                n.updated_at = Utc::now();
                true
            }))
    }

    async fn delete(&self, user_id: &str, ids: &[Uuid]) -> Result<u64> {
        let removed = self.notifications.remove_where(Self::owned_by(user_id, ids));
        self.drop_orphan_attempts();
        Ok(removed)
    }

    async fn clear_all(&self, user_id: &str) -> Result<u64> {
        let removed = self.notifications.remove_where(|n| n.user_id == user_id);
        self.drop_orphan_attempts();
        Ok(removed)
    }

    async fn update_delivery_status(&self, id: Uuid, status: NotificationStatus) -> Result<()> {
        self.notifications.update_where(
            |n| n.id == id,
            |n| {
                if matches!(n.status, NotificationStatus::Read | NotificationStatus::Archived) {
                    return false;
                }
                n.status = settled_status(n, status);
                n.updated_at = Utc::now();
                true
            },
        );
        Ok(())
    }

    async fn unread_count(&self, user_id: &str) -> Result<i64> {
        Ok(self
            .notifications
            .list_by(|n| n.user_id == user_id && !n.is_read && !n.is_archived)
            .len() as i64)
    }

    async fn stats(&self, user_id: &str) -> Result<NotificationStats> {
        let items = self.notifications.list_by(|n| n.user_id == user_id);

        Ok(NotificationStats {
            total: items.len() as i64,
            unread: items.iter().filter(|n| !n.is_read).count() as i64,
            read: items.iter().filter(|n| n.is_read).count() as i64,
            archived: items.iter().filter(|n| n.is_archived).count() as i64,
            by_type: Self::count_by(&items, |n| n.notification_type.as_str()),
            by_category: Self::count_by(&items, |n| n.category.as_str()),
            by_priority: Self::count_by(&items, |n| n.priority.as_str()),
            by_status: Self::count_by(&items, |n| n.status.as_str()),
            ..Default::default()
        })
    }

    async fn list_due_deferred(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Notification>> {
        let mut items = self.notifications.list_by(|n| {
            n.status == NotificationStatus::Pending && n.scheduled_at.is_some_and(|t| t <= now)
        });
        items.sort_by_key(|n| n.scheduled_at);
        items.truncate(limit.max(0) as usize);
        Ok(items)
    }
}

/// pending 状态保留给尚未投递的延后通知，已读只改标记
fn mark_read(n: &mut Notification, at: DateTime<Utc>) -> bool {
    if n.is_read {
        return false;
    }
    n.is_read = true;
    n.read_at = Some(at);
    if !n.is_archived && n.status != NotificationStatus::Pending {
        n.status = NotificationStatus::Read;
    }
    n.updated_at = at;
    true
}

/// 投递完成后的状态：已归档/已读标记优先于投递结果
fn settled_status(n: &Notification, delivered: NotificationStatus) -> NotificationStatus {
    if n.is_archived {
        NotificationStatus::Archived
    } else if n.is_read && delivered != NotificationStatus::Failed {
        NotificationStatus::Read
    } else {
        delivered
    }
}

// ==================== 投递记录 ====================

#[async_trait]
impl DeliveryAttemptRepositoryTrait for MemoryStore {
    async fn upsert_pending(
        &self,
        notification_id: Uuid,
        channel: DeliveryChannel,
        at: DateTime<Utc>,
    ) -> Result<DeliveryAttempt> {
        let key = (notification_id, channel);
        let attempt = match self.attempts.get(&key) {
            Some(mut existing) => {
                existing.status = DeliveryStatus::Pending;
                existing.updated_at = at;
                existing
            }
            None => DeliveryAttempt {
                id: Uuid::now_v7(),
                notification_id,
                channel,
                status: DeliveryStatus::Pending,
                attempts: 0,
                last_attempt_at: None,
                delivered_at: None,
                failure_reason: None,
                external_id: None,
                metadata: serde_json::json!({}),
                created_at: at,
                updated_at: at,
            },
        };
        self.attempts.insert(key, attempt.clone());
        Ok(attempt)
    }

    async fn record_outcome(
        &self,
        notification_id: Uuid,
        channel: DeliveryChannel,
        outcome: &DeliveryOutcome,
    ) -> Result<DeliveryAttempt> {
        let key = (notification_id, channel);
        let mut attempt = self.attempts.get(&key).ok_or_else(|| {
            NotificationError::Internal(format!(
                "投递记录不存在: notification_id={notification_id}, channel={}",
                channel.as_str()
            ))
        })?;

        attempt.status = outcome.status;
        attempt.attempts += 1;
        attempt.last_attempt_at = Some(outcome.at);
        if outcome.status == DeliveryStatus::Delivered {
            attempt.delivered_at = Some(outcome.at);
        }
        attempt.failure_reason = outcome.failure_reason.clone();
        if outcome.external_id.is_some() {
            attempt.external_id = outcome.external_id.clone();
        }
        attempt.metadata = outcome.metadata.clone();
        attempt.updated_at = outcome.at;

        self.attempts.insert(key, attempt.clone());
        Ok(attempt)
    }

    async fn list_by_notification(&self, notification_id: Uuid) -> Result<Vec<DeliveryAttempt>> {
        let mut attempts = self
            .attempts
            .list_by(|a| a.notification_id == notification_id);
        attempts.sort_by_key(|a| a.created_at);
        Ok(attempts)
    }

    async fn delivery_summary(&self, user_id: &str) -> Result<(i64, i64, f64)> {
        let owned: HashMap<Uuid, DateTime<Utc>> = self
            .notifications
            .list_by(|n| n.user_id == user_id)
            .into_iter()
            .map(|n| (n.id, n.created_at))
            .collect();
        let attempts = self
            .attempts
            .list_by(|a| owned.contains_key(&a.notification_id));

        let delivered = attempts
            .iter()
            .filter(|a| a.status == DeliveryStatus::Delivered)
            .count() as i64;
        let failed = attempts
            .iter()
            .filter(|a| a.status == DeliveryStatus::Failed)
            .count() as i64;

        let latencies: Vec<f64> = attempts
            .iter()
            .filter_map(|a| {
                let delivered_at = a.delivered_at?;
                let created_at = owned.get(&a.notification_id)?;
                Some((delivered_at - *created_at).num_milliseconds() as f64)
            })
            .collect();
        let average = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<f64>() / latencies.len() as f64
        };

        Ok((delivered, failed, average))
    }
}

// ==================== 模板 ====================

#[async_trait]
impl TemplateRepositoryTrait for MemoryStore {
    async fn create(&self, template: &NotificationTemplate) -> Result<()> {
        self.templates.insert(template.id, template.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<NotificationTemplate>> {
        Ok(self.templates.get(&id))
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<NotificationTemplate>> {
        Ok(self.templates.list_by(|t| t.name == name).into_iter().next())
    }

    async fn list(&self, active_only: bool) -> Result<Vec<NotificationTemplate>> {
        let mut templates = self.templates.list_by(|t| !active_only || t.is_active);
        templates.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(templates)
    }

    async fn update(&self, template: &NotificationTemplate) -> Result<()> {
        self.templates.insert(template.id, template.clone());
        Ok(())
    }

    async fn deactivate(&self, id: Uuid) -> Result<bool> {
        Ok(self.templates.update_where(
            |t| t.id == id,
            |t| {
                t.is_active = false;
                t.updated_at = Utc::now();
                true
            },
        ) > 0)
    }
}

// ==================== 偏好 ====================

#[async_trait]
impl PreferenceRepositoryTrait for MemoryStore {
    async fn get(&self, user_id: &str) -> Result<Option<NotificationPreferences>> {
        Ok(self.preferences.get(&user_id.to_string()))
    }

    async fn get_or_create(
        &self,
        defaults: &NotificationPreferences,
    ) -> Result<NotificationPreferences> {
        let prefs = self
            .preferences
            .data
            .entry(defaults.user_id.clone())
            .or_insert_with(|| defaults.clone())
            .value()
            .clone();
        Ok(prefs)
    }

    async fn upsert(&self, prefs: &NotificationPreferences) -> Result<NotificationPreferences> {
        let mut entry = self
            .preferences
            .data
            .entry(prefs.user_id.clone())
            .or_insert_with(|| prefs.clone());
        let created_at = entry.created_at;
        let id = entry.id;
        *entry = NotificationPreferences {
            id,
            created_at,
            ..prefs.clone()
        };
        Ok(entry.value().clone())
    }
}

// ==================== 定时通知 ====================

#[async_trait]
impl ScheduleRepositoryTrait for MemoryStore {
    async fn create(&self, schedule: &ScheduledNotification) -> Result<()> {
        self.schedules.insert(schedule.id, schedule.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ScheduledNotification>> {
        Ok(self.schedules.get(&id))
    }

    async fn list_by_user(
        &self,
        user_id: &str,
        active_only: bool,
    ) -> Result<Vec<ScheduledNotification>> {
        let mut schedules = self
            .schedules
            .list_by(|s| s.user_id == user_id && (!active_only || s.is_active));
        schedules.sort_by_key(|s| s.scheduled_at);
        Ok(schedules)
    }

    async fn update(&self, schedule: &ScheduledNotification) -> Result<()> {
        self.schedules.insert(schedule.id, schedule.clone());
        Ok(())
    }

    async fn due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<ScheduledNotification>> {
        let mut schedules = self.schedules.list_by(|s| s.is_due(now));
        schedules.sort_by_key(|s| s.scheduled_at);
        schedules.truncate(limit.max(0) as usize);
        Ok(schedules)
    }

    async fn record_execution(
        &self,
        id: Uuid,
        executed_at: DateTime<Utc>,
        next: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.schedules.update_where(
            |s| s.id == id,
            |s| {
                s.execution_count += 1;
                s.last_executed_at = Some(executed_at);
                match next {
                    Some(next) => s.scheduled_at = next,
                    None => s.is_active = false,
                }
                s.updated_at = executed_at;
                true
            },
        );
        Ok(())
    }

    async fn deactivate(&self, id: Uuid) -> Result<bool> {
        Ok(self.schedules.update_where(
            |s| s.id == id && s.is_active,
            |s| {
                s.is_active = false;
                s.updated_at = Utc::now();
                true
            },
        ) > 0)
    }
}

// ==================== 批量任务 ====================

#[async_trait]
impl BatchRepositoryTrait for MemoryStore {
    async fn create(&self, batch: &NotificationBatch) -> Result<()> {
        self.batches.insert(batch.id, batch.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<NotificationBatch>> {
        Ok(self.batches.get(&id))
    }

    async fn transition(&self, id: Uuid, progress: &BatchProgress) -> Result<NotificationBatch> {
        let mut batch = self
            .batches
            .data
            .get_mut(&id)
            .ok_or(NotificationError::BatchNotFound(id))?;

        if !batch.status.can_transition_to(progress.status) {
            return Err(NotificationError::InvalidBatchTransition {
                batch_id: id,
                from: batch.status,
                to: progress.status,
            });
        }

        batch.status = progress.status;
        batch.success_count = progress.success_count;
        batch.failure_count = progress.failure_count;
        match progress.status {
            BatchStatus::Processing => batch.started_at = Some(progress.at),
            BatchStatus::Completed | BatchStatus::Failed => batch.completed_at = Some(progress.at),
            BatchStatus::Pending => {}
        }
        batch.updated_at = progress.at;

        Ok(batch.value().clone())
    }
}

// ==================== 推送订阅 ====================

#[async_trait]
impl PushSubscriptionRepositoryTrait for MemoryStore {
    async fn upsert(&self, subscription: &PushSubscription) -> Result<PushSubscription> {
        let existing = self
            .subscriptions
            .list_by(|s| s.user_id == subscription.user_id && s.endpoint == subscription.endpoint)
            .into_iter()
            .next();

        let stored = match existing {
            Some(existing) => PushSubscription {
                p256dh: subscription.p256dh.clone(),
                auth: subscription.auth.clone(),
                user_agent: subscription.user_agent.clone(),
                is_active: true,
                updated_at: subscription.updated_at,
                ..existing
            },
            None => PushSubscription {
                is_active: true,
                ..subscription.clone()
            },
        };
        self.subscriptions.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<PushSubscription>> {
        let mut subscriptions = self.subscriptions.list_by(|s| s.user_id == user_id);
        subscriptions.sort_by_key(|s| s.created_at);
        Ok(subscriptions)
    }

    async fn list_active(&self, user_id: &str) -> Result<Vec<PushSubscription>> {
        let mut subscriptions = self
            .subscriptions
            .list_by(|s| s.user_id == user_id && s.is_active);
        subscriptions.sort_by_key(|s| s.created_at);
        Ok(subscriptions)
    }

    async fn deactivate(&self, id: Uuid) -> Result<()> {
        self.subscriptions.update_where(
            |s| s.id == id,
            |s| {
                s.is_active = false;
                s.updated_at = Utc::now();
                true
            },
        );
        Ok(())
    }

    async fn touch(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.subscriptions.update_where(
            |s| s.id == id,
            |s| {
                s.last_used_at = Some(at);
                true
            },
        );
        Ok(())
    }

    async fn delete(&self, user_id: &str, endpoint: &str) -> Result<bool> {
        Ok(self
            .subscriptions
            .remove_where(|s| s.user_id == user_id && s.endpoint == endpoint)
            > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NotificationCategory, NotificationType};
    use serde_json::json;

    fn notification(user_id: &str, priority: NotificationPriority) -> Notification {
        let now = Utc::now();
        Notification {
            id: Uuid::now_v7(),
            user_id: user_id.to_string(),
            title: "title".to_string(),
            message: "message".to_string(),
            notification_type: NotificationType::Info,
            category: NotificationCategory::Study,
            priority,
            status: NotificationStatus::Delivered,
            channels: vec![DeliveryChannel::InApp],
            metadata: json!({}),
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
        }
    }

    #[tokio::test]
    async fn test_unknown_user_rejected() {
        let store = MemoryStore::with_users(["alice"]);
        let ok = NotificationRepositoryTrait::create(
            &store,
            &notification("alice", NotificationPriority::Low),
        )
        .await;
        let err = NotificationRepositoryTrait::create(
            &store,
            &notification("mallory", NotificationPriority::Low),
        )
        .await;
        assert!(ok.is_ok());
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_list_sorted_by_priority_with_pagination() {
        let store = MemoryStore::new();
        for priority in [
            NotificationPriority::Low,
            NotificationPriority::Urgent,
            NotificationPriority::Medium,
        ] {
            NotificationRepositoryTrait::create(&store, &notification("u1", priority))
                .await
                .unwrap();
        }
        NotificationRepositoryTrait::create(&store, &notification("u2", NotificationPriority::High))
            .await
            .unwrap();

        let query = NotificationQuery {
            sort_by: SortField::Priority,
            sort_order: SortOrder::Desc,
            limit: Some(2),
            ..Default::default()
        };
        let (items, total) = NotificationRepositoryTrait::list(&store, "u1", &query).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].priority, NotificationPriority::Urgent);
        assert_eq!(items[1].priority, NotificationPriority::Medium);
    }

    #[tokio::test]
    async fn test_attempts_increment_and_stay_unique() {
        let store = MemoryStore::new();
        let id = Uuid::now_v7();
        let now = Utc::now();

        store.upsert_pending(id, DeliveryChannel::Email, now).await.unwrap();
        let failed = DeliveryOutcome {
            status: DeliveryStatus::Failed,
            external_id: None,
            failure_reason: Some("timeout".to_string()),
            metadata: json!({}),
            at: now,
        };
        store.record_outcome(id, DeliveryChannel::Email, &failed).await.unwrap();

        store.upsert_pending(id, DeliveryChannel::Email, now).await.unwrap();
        let delivered = DeliveryOutcome {
            status: DeliveryStatus::Delivered,
            external_id: Some("msg-1".to_string()),
            failure_reason: None,
            metadata: json!({}),
            at: now,
        };
        let attempt = store
            .record_outcome(id, DeliveryChannel::Email, &delivered)
            .await
            .unwrap();

        assert_eq!(attempt.attempts, 2);
        assert_eq!(attempt.status, DeliveryStatus::Delivered);
        assert_eq!(attempt.external_id.as_deref(), Some("msg-1"));
        assert_eq!(store.list_by_notification(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_preferences_get_or_create_keeps_existing() {
        let store = MemoryStore::new();
        let mut prefs = NotificationPreferences::defaults_for("u1");
        prefs.sms_enabled = true;
        PreferenceRepositoryTrait::upsert(&store, &prefs).await.unwrap();

        let fetched = store
            .get_or_create(&NotificationPreferences::defaults_for("u1"))
            .await
            .unwrap();
        assert!(fetched.sms_enabled);
    }
}
