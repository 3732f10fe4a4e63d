//! 定时通知调度 Worker
//!
//! 以固定间隔轮询到期的定时通知，每条按一次全新的创建请求执行：
//! - 一次性定时：执行后停用
//! - 周期定时：按周期计算下次触发时间，超过 end_date 或达到
//!   max_occurrences 后停用
//!
//! 同一轮询还负责投递免打扰期间延后的通知。
//! 单条失败只记录日志和指标，不影响同批其他记录。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use notify_shared::config::SchedulerConfig;
use notify_shared::observability::metrics as app_metrics;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::models::{RecurringInterval, RecurringRule, ScheduledNotification};
use crate::notification::quiet_hours::{local_to_utc, parse_timezone};
use crate::repository::ScheduleRepositoryTrait;
use crate::service::NotificationService;
use crate::service::dto::CreateNotificationRequest;

/// 一轮调度的结果统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub executed: usize,
    pub failed: usize,
    pub deactivated: usize,
    pub deferred_delivered: usize,
}

pub struct NotificationScheduler {
    schedules: Arc<dyn ScheduleRepositoryTrait>,
    notifications: Arc<NotificationService>,
    poll_interval: Duration,
    batch_size: i64,
}

impl NotificationScheduler {
    pub fn new(
        schedules: Arc<dyn ScheduleRepositoryTrait>,
        notifications: Arc<NotificationService>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            schedules,
            notifications,
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            batch_size: config.batch_size.max(1),
        }
    }

    /// 主循环：直到收到停止信号
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval = ?self.poll_interval,
            batch_size = self.batch_size,
            "NotificationScheduler 已启动"
        );

        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        error!(error = %e, "定时通知调度出错");
                    }
                    // 记录 Worker 健康状态
                    app_metrics::set_worker_last_run("notification_scheduler");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("NotificationScheduler 已停止");
    }

    /// 执行一轮调度
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickSummary> {
        let mut summary = TickSummary::default();

        let due = self.schedules.due(now, self.batch_size).await?;
        if !due.is_empty() {
            info!(count = due.len(), "发现到期的定时通知");
        }

        for schedule in &due {
            let created = self
                .notifications
                .create(Self::request_for(schedule))
                .await;

            match &created {
                Ok(notification) => {
                    summary.executed += 1;
                    app_metrics::record_scheduled_execution("success");
                    debug!(
                        schedule_id = %schedule.id,
                        notification_id = %notification.id,
                        "定时通知已执行"
                    );
                }
                Err(e) => {
                    summary.failed += 1;
                    app_metrics::record_scheduled_execution("failure");
                    warn!(schedule_id = %schedule.id, error = %e, "定时通知执行失败");
                }
            }

            // 失败的这一次同样计入，避免每轮重复触发
            let next = schedule.recurring_rule().and_then(|rule| {
                next_occurrence(
                    schedule.scheduled_at,
                    rule,
                    schedule.execution_count + 1,
                    parse_timezone(&schedule.timezone),
                )
            });
            if next.is_none() {
                summary.deactivated += 1;
            }
            if let Err(e) = self.schedules.record_execution(schedule.id, now, next).await {
                error!(schedule_id = %schedule.id, error = %e, "记录定时通知执行结果失败");
            }
        }

        summary.deferred_delivered = self
            .notifications
            .deliver_due_deferred(now, self.batch_size)
            .await?;

        if summary != TickSummary::default() {
            info!(
                executed = summary.executed,
                failed = summary.failed,
                deactivated = summary.deactivated,
                deferred_delivered = summary.deferred_delivered,
                "定时调度完成"
            );
        }
        Ok(summary)
    }

    fn request_for(schedule: &ScheduledNotification) -> CreateNotificationRequest {
        let mut metadata = schedule.metadata.clone();
        if let Some(map) = metadata.as_object_mut() {
            map.insert(
                "scheduledNotificationId".to_string(),
                serde_json::Value::String(schedule.id.to_string()),
            );
        }

        CreateNotificationRequest {
            user_id: schedule.user_id.clone(),
            title: schedule.title.clone(),
            message: schedule.message.clone(),
            notification_type: schedule.notification_type,
            category: schedule.category,
            priority: schedule.priority,
            channels: Some(schedule.channels.clone()).filter(|c| !c.is_empty()),
            metadata: Some(metadata),
            template_id: schedule.template_id,
            template_variables: schedule.template_variables.clone(),
            expires_at: None,
        }
    }
}

/// 计算周期定时的下次触发时间
///
/// 周期步进与星期/日期匹配都按定时所在时区的本地时间进行，结果转回 UTC。
/// `executions` 为包含本次在内的已执行次数；返回 None 表示应停用
pub fn next_occurrence(
    previous: DateTime<Utc>,
    rule: &RecurringRule,
    executions: i32,
    tz: Tz,
) -> Option<DateTime<Utc>> {
    if rule.max_occurrences.is_some_and(|max| executions >= max) {
        return None;
    }

    let local = previous.with_timezone(&tz).naive_local();
    let next_local = match rule.interval {
        RecurringInterval::Daily => local.checked_add_days(Days::new(1)),
        RecurringInterval::Weekly => match rule.days_of_week.as_deref() {
            Some(days) if !days.is_empty() => next_matching_weekday(local, days),
            _ => local.checked_add_days(Days::new(7)),
        },
        RecurringInterval::Monthly => {
            let shifted = local.checked_add_months(Months::new(1))?;
            match rule.day_of_month {
                Some(day) => {
                    let day = day.min(days_in_month(shifted.year(), shifted.month()));
                    shifted.with_day(day)
                }
                None => Some(shifted),
            }
        }
        RecurringInterval::Yearly => local.checked_add_months(Months::new(12)),
    }?;
    let next = local_to_utc(tz, next_local.date(), next_local.time());

    match rule.end_date {
        Some(end) if end < next => None,
        _ => Some(next),
    }
}

/// 0 = 周日
fn next_matching_weekday(previous: NaiveDateTime, days: &[u32]) -> Option<NaiveDateTime> {
    (1..=7u64)
        .filter_map(|offset| previous.checked_add_days(Days::new(offset)))
        .find(|candidate| days.contains(&candidate.weekday().num_days_from_sunday()))
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}


#[cfg(test)]
mod tick_tests {
    use super::*;
    use crate::models::{NotificationQuery, RecurringInterval};
    use crate::notification::{DeliveryDispatcher, InAppChannel, NoopBroadcaster};
    use crate::repository::{MemoryStore, NotificationRepositoryTrait};
    use chrono::Duration as ChronoDuration;
    use chrono::TimeZone;
    use serde_json::json;
    use sqlx::types::Json;
    use uuid::Uuid;

    fn scheduler(store: Arc<MemoryStore>) -> NotificationScheduler {
        let dispatcher = DeliveryDispatcher::new(store.clone(), store.clone(), Duration::from_secs(1))
            .with_channel(Arc::new(InAppChannel::new(store.clone())));
        let notifications = Arc::new(NotificationService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(dispatcher),
            Arc::new(NoopBroadcaster),
        ));
        NotificationScheduler::new(store, notifications, &SchedulerConfig::default())
    }

    fn schedule(user_id: &str, at: DateTime<Utc>, rule: Option<RecurringRule>) -> ScheduledNotification {
        ScheduledNotification {
            id: Uuid::now_v7(),
            user_id: user_id.to_string(),
            title: Some("Review".to_string()),
            message: Some("Flashcards".to_string()),
            notification_type: None,
            category: None,
            priority: None,
            channels: vec![],
            metadata: json!({}),
            template_id: None,
            template_variables: None,
            scheduled_at: at,
            timezone: "UTC".to_string(),
            recurring: rule.map(Json),
            is_active: true,
            last_executed_at: None,
            execution_count: 0,
            created_at: at,
            updated_at: at,
        }
    }

    #[tokio::test]
    async fn test_one_shot_deactivates() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let s = schedule("u1", now - ChronoDuration::minutes(1), None);
        ScheduleRepositoryTrait::create(store.as_ref(), &s).await.unwrap();

        let summary = scheduler(store.clone()).tick(now).await.unwrap();
        assert_eq!(summary.executed, 1);
        assert_eq!(summary.deactivated, 1);

        let stored = ScheduleRepositoryTrait::get(store.as_ref(), s.id).await.unwrap().unwrap();
        assert!(!stored.is_active);
        assert_eq!(stored.execution_count, 1);

        let (items, _) = NotificationRepositoryTrait::list(store.as_ref(), "u1", &NotificationQuery::default())
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].metadata["scheduledNotificationId"], json!(s.id.to_string()));
    }

    #[tokio::test]
    async fn test_failure_is_isolated_and_advances() {
        let store = Arc::new(MemoryStore::with_users(["u1"]));
        let now = Utc::now();
        let due = now - ChronoDuration::minutes(5);
        let broken = schedule("ghost", due, Some(RecurringRule::new(RecurringInterval::Daily)));
        let ok = schedule("u1", due, None);
        ScheduleRepositoryTrait::create(store.as_ref(), &broken).await.unwrap();
        ScheduleRepositoryTrait::create(store.as_ref(), &ok).await.unwrap();

        let summary = scheduler(store.clone()).tick(now).await.unwrap();
        assert_eq!(summary.executed, 1);
        assert_eq!(summary.failed, 1);

        let stored = ScheduleRepositoryTrait::get(store.as_ref(), broken.id).await.unwrap().unwrap();
        assert!(stored.is_active);
        assert_eq!(stored.scheduled_at, due + ChronoDuration::days(1));
    }

    #[tokio::test]
    async fn test_recurrence_uses_schedule_timezone() {
        let store = Arc::new(MemoryStore::new());
        let due = Utc.with_ymd_and_hms(2026, 10, 19, 23, 30, 0).unwrap();
        let mut rule = RecurringRule::new(RecurringInterval::Weekly);
        rule.days_of_week = Some(vec![2]);
        let mut s = schedule("u1", due, Some(rule));
        s.timezone = "Asia/Shanghai".to_string();
        ScheduleRepositoryTrait::create(store.as_ref(), &s).await.unwrap();

        let summary = scheduler(store.clone())
            .tick(due + ChronoDuration::minutes(1))
            .await
            .unwrap();
        assert_eq!(summary.executed, 1);

        let stored = ScheduleRepositoryTrait::get(store.as_ref(), s.id).await.unwrap().unwrap();
        assert_eq!(
            stored.scheduled_at,
            Utc.with_ymd_and_hms(2026, 10, 26, 23, 30, 0).unwrap()
        );
    }
}
