//! 定时通知服务
//!
//! 只负责定时记录的增删改查，到期执行由 `worker::scheduler` 完成。
//! 所有操作都校验归属，访问他人的定时记录按不存在处理。

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use sqlx::types::Json;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use super::dto::{ScheduleNotificationRequest, UpdateScheduleRequest, check_recurring_rule};
use crate::error::{NotificationError, Result};
use crate::models::ScheduledNotification;
use crate::repository::{ScheduleRepositoryTrait, TemplateRepositoryTrait};

pub struct ScheduleService {
    schedules: Arc<dyn ScheduleRepositoryTrait>,
    templates: Arc<dyn TemplateRepositoryTrait>,
}

impl ScheduleService {
    pub fn new(
        schedules: Arc<dyn ScheduleRepositoryTrait>,
        templates: Arc<dyn TemplateRepositoryTrait>,
    ) -> Self {
        Self {
            schedules,
            templates,
        }
    }

    #[instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn create(
        &self,
        request: ScheduleNotificationRequest,
    ) -> Result<ScheduledNotification> {
        request.check()?;
        if let Some(template_id) = request.template_id {
            let template = self
                .templates
                .get(template_id)
                .await?
                .ok_or(NotificationError::TemplateNotFound(template_id))?;
            if !template.is_active {
                return Err(NotificationError::TemplateInactive(template_id));
            }
        }

        let now = Utc::now();
        let schedule = ScheduledNotification {
            id: Uuid::now_v7(),
            user_id: request.user_id,
            title: request.title,
            message: request.message,
            notification_type: request.notification_type,
            category: request.category,
            priority: request.priority,
            channels: request.channels.unwrap_or_default(),
            metadata: request.metadata.unwrap_or_else(|| json!({})),
            template_id: request.template_id,
            template_variables: request.template_variables,
            scheduled_at: request.scheduled_at,
            timezone: request.timezone.unwrap_or_else(|| "UTC".to_string()),
            recurring: request.recurring.map(Json),
            is_active: true,
            last_executed_at: None,
            execution_count: 0,
            created_at: now,
            updated_at: now,
        };

        self.schedules.create(&schedule).await?;
        info!(
            schedule_id = %schedule.id,
            scheduled_at = %schedule.scheduled_at,
            recurring = schedule.recurring.is_some(),
            "定时通知已创建"
        );
        Ok(schedule)
    }

    pub async fn list(
        &self,
        user_id: &str,
        active_only: bool,
    ) -> Result<Vec<ScheduledNotification>> {
        self.schedules.list_by_user(user_id, active_only).await
    }

    pub async fn get(&self, user_id: &str, id: Uuid) -> Result<ScheduledNotification> {
        self.schedules
            .get(id)
            .await?
            .filter(|s| s.user_id == user_id)
            .ok_or(NotificationError::ScheduleNotFound(id))
    }

    #[instrument(skip(self, request))]
    pub async fn update(
        &self,
        user_id: &str,
        id: Uuid,
        request: UpdateScheduleRequest,
    ) -> Result<ScheduledNotification> {
        request.validate()?;
        let mut schedule = self.get(user_id, id).await?;

        if schedule.template_id.is_some() && (request.title.is_some() || request.message.is_some())
        {
            return Err(NotificationError::Validation(
                "模板定时通知不能修改标题或内容".to_string(),
            ));
        }

        if let Some(v) = request.title {
            schedule.title = Some(v);
        }
        if let Some(v) = request.message {
            schedule.message = Some(v);
        }
        if let Some(v) = request.priority {
            schedule.priority = Some(v);
        }
        if let Some(v) = request.channels {
            schedule.channels = v;
        }
        if let Some(v) = request.metadata {
            schedule.metadata = v;
        }
        if let Some(v) = request.template_variables {
            schedule.template_variables = Some(v);
        }
        if let Some(v) = request.scheduled_at {
            schedule.scheduled_at = v;
        }
        if let Some(v) = request.timezone {
            schedule.timezone = v;
        }
        if request.clear_recurring {
            schedule.recurring = None;
        } else if let Some(rule) = request.recurring {
            check_recurring_rule(&rule, schedule.scheduled_at)?;
            schedule.recurring = Some(Json(rule));
        }
        schedule.updated_at = Utc::now();

        self.schedules.update(&schedule).await?;
        info!(schedule_id = %id, "定时通知已更新");
        Ok(schedule)
    }

    /// 取消定时通知
    pub async fn cancel(&self, user_id: &str, id: Uuid) -> Result<()> {
        let schedule = self.get(user_id, id).await?;
        if !self.schedules.deactivate(schedule.id).await? {
            return Err(NotificationError::ScheduleNotFound(id));
        }
        info!(schedule_id = %id, user_id = %user_id, "定时通知已取消");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RecurringInterval, RecurringRule};
    use crate::repository::MemoryStore;
    use chrono::Duration;

    fn service() -> ScheduleService {
        let store = Arc::new(MemoryStore::new());
        ScheduleService::new(store.clone(), store)
    }

    fn request(user_id: &str) -> ScheduleNotificationRequest {
        ScheduleNotificationRequest {
            user_id: user_id.to_string(),
            title: Some("Study time".to_string()),
            message: Some("Open your notes".to_string()),
            scheduled_at: Utc::now() + Duration::hours(1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_defaults_timezone() {
        let service = service();
        let schedule = service.create(request("u1")).await.unwrap();
        assert_eq!(schedule.timezone, "UTC");
        assert!(schedule.is_active);
        assert_eq!(schedule.execution_count, 0);
    }

    #[tokio::test]
    async fn test_missing_template_rejected() {
        let service = service();
        let request = ScheduleNotificationRequest {
            user_id: "u1".to_string(),
            template_id: Some(Uuid::now_v7()),
            scheduled_at: Utc::now(),
            ..Default::default()
        };
        assert!(matches!(
            service.create(request).await,
            Err(NotificationError::TemplateNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_ownership_enforced() {
        let service = service();
        let schedule = service.create(request("u1")).await.unwrap();

        assert!(matches!(
            service.get("u2", schedule.id).await,
            Err(NotificationError::ScheduleNotFound(_))
        ));
        assert!(service.cancel("u2", schedule.id).await.is_err());
        assert!(service.get("u1", schedule.id).await.unwrap().is_active);
    }

    #[tokio::test]
    async fn test_update_and_cancel() {
        let service = service();
        let schedule = service.create(request("u1")).await.unwrap();

        let mut rule = RecurringRule::new(RecurringInterval::Weekly);
        rule.days_of_week = Some(vec![1, 3]);
        let updated = service
            .update(
                "u1",
                schedule.id,
                UpdateScheduleRequest {
                    title: Some("New title".to_string()),
                    recurring: Some(rule),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.title.as_deref(), Some("New title"));
        assert!(updated.recurring_rule().is_some());

        let cleared = service
            .update(
                "u1",
                schedule.id,
                UpdateScheduleRequest {
                    clear_recurring: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(cleared.recurring.is_none());

        service.cancel("u1", schedule.id).await.unwrap();
        assert!(service.list("u1", true).await.unwrap().is_empty());
        assert_eq!(service.list("u1", false).await.unwrap().len(), 1);
        assert!(service.cancel("u1", schedule.id).await.is_err());
    }
}
