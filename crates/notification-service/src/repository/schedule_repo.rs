//! 定时通知仓储

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::traits::ScheduleRepositoryTrait;
use crate::error::Result;
use crate::models::ScheduledNotification;

const SCHEDULE_COLUMNS: &str = "id, user_id, title, message, notification_type, category, \
     priority, channels, metadata, template_id, template_variables, scheduled_at, timezone, \
     recurring, is_active, last_executed_at, execution_count, created_at, updated_at";

/// 定时通知仓储
pub struct ScheduleRepository {
    pool: PgPool,
}

impl ScheduleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScheduleRepositoryTrait for ScheduleRepository {
    async fn create(&self, s: &ScheduledNotification) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scheduled_notifications (
                id, user_id, title, message, notification_type, category, priority, channels,
                metadata, template_id, template_variables, scheduled_at, timezone, recurring,
                is_active, last_executed_at, execution_count, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                    $15, $16, $17, $18, $19)
            "#,
        )
        .bind(s.id)
        .bind(&s.user_id)
        .bind(&s.title)
        .bind(&s.message)
        .bind(s.notification_type)
        .bind(s.category)
        .bind(s.priority)
        .bind(sqlx::types::Json(&s.channels))
        .bind(&s.metadata)
        .bind(s.template_id)
        .bind(&s.template_variables)
        .bind(s.scheduled_at)
        .bind(&s.timezone)
        .bind(&s.recurring)
        .bind(s.is_active)
        .bind(s.last_executed_at)
        .bind(s.execution_count)
        .bind(s.created_at)
        .bind(s.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ScheduledNotification>> {
        let sql = format!("SELECT {SCHEDULE_COLUMNS} FROM scheduled_notifications WHERE id = $1");
        let schedule = sqlx::query_as::<_, ScheduledNotification>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(schedule)
    }

    async fn list_by_user(
        &self,
        user_id: &str,
        active_only: bool,
    ) -> Result<Vec<ScheduledNotification>> {
        let sql = format!(
            "SELECT {SCHEDULE_COLUMNS} FROM scheduled_notifications \
             WHERE user_id = $1 AND ($2 = FALSE OR is_active = TRUE) \
             ORDER BY scheduled_at ASC"
        );
        let schedules = sqlx::query_as::<_, ScheduledNotification>(&sql)
            .bind(user_id)
            .bind(active_only)
            .fetch_all(&self.pool)
            .await?;

        Ok(schedules)
    }

    async fn update(&self, s: &ScheduledNotification) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scheduled_notifications
            SET title = $2, message = $3, notification_type = $4, category = $5, priority = $6,
                channels = $7, metadata = $8, template_id = $9, template_variables = $10,
                scheduled_at = $11, timezone = $12, recurring = $13, is_active = $14,
                updated_at = $15
            WHERE id = $1
            "#,
        )
        .bind(s.id)
        .bind(&s.title)
        .bind(&s.message)
        .bind(s.notification_type)
        .bind(s.category)
        .bind(s.priority)
        .bind(sqlx::types::Json(&s.channels))
        .bind(&s.metadata)
        .bind(s.template_id)
        .bind(&s.template_variables)
        .bind(s.scheduled_at)
        .bind(&s.timezone)
        .bind(&s.recurring)
        .bind(s.is_active)
        .bind(s.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<ScheduledNotification>> {
        let sql = format!(
            "SELECT {SCHEDULE_COLUMNS} FROM scheduled_notifications \
             WHERE is_active = TRUE AND scheduled_at <= $1 \
             ORDER BY scheduled_at ASC LIMIT $2"
        );
        let schedules = sqlx::query_as::<_, ScheduledNotification>(&sql)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(schedules)
    }

    async fn record_execution(
        &self,
        id: Uuid,
        executed_at: DateTime<Utc>,
        next: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scheduled_notifications
            SET execution_count = execution_count + 1,
                last_executed_at = $2,
                scheduled_at = COALESCE($3, scheduled_at),
                is_active = ($3 IS NOT NULL),
                updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(executed_at)
        .bind(next)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn deactivate(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_notifications
            SET is_active = FALSE, updated_at = NOW()
            WHERE id = $1 AND is_active = TRUE
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
