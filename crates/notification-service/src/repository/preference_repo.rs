//! 通知偏好仓储
//!
//! 依赖 user_id 唯一约束实现原子 upsert

use async_trait::async_trait;
use sqlx::PgPool;

use super::traits::PreferenceRepositoryTrait;
use crate::error::Result;
use crate::models::NotificationPreferences;

const PREFERENCE_COLUMNS: &str = "id, user_id, email_enabled, push_enabled, in_app_enabled, \
     sms_enabled, quiet_hours_enabled, quiet_hours_start, quiet_hours_end, timezone, \
     category_preferences, created_at, updated_at";

/// 通知偏好仓储
pub struct PreferenceRepository {
    pool: PgPool,
}

impl PreferenceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PreferenceRepositoryTrait for PreferenceRepository {
    async fn get(&self, user_id: &str) -> Result<Option<NotificationPreferences>> {
        let sql =
            format!("SELECT {PREFERENCE_COLUMNS} FROM notification_preferences WHERE user_id = $1");
        let prefs = sqlx::query_as::<_, NotificationPreferences>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(prefs)
    }

    async fn get_or_create(
        &self,
        defaults: &NotificationPreferences,
    ) -> Result<NotificationPreferences> {
        // DO UPDATE 空更新保证冲突时也能 RETURNING 已有行
        let sql = format!(
            r#"
            INSERT INTO notification_preferences (
                id, user_id, email_enabled, push_enabled, in_app_enabled, sms_enabled,
                quiet_hours_enabled, quiet_hours_start, quiet_hours_end, timezone,
                category_preferences, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (user_id) DO UPDATE SET user_id = EXCLUDED.user_id
            RETURNING {PREFERENCE_COLUMNS}
            "#
        );
        let prefs = bind_preferences(sqlx::query_as::<_, NotificationPreferences>(&sql), defaults)
            .fetch_one(&self.pool)
            .await?;

        Ok(prefs)
    }

    async fn upsert(&self, p: &NotificationPreferences) -> Result<NotificationPreferences> {
        let sql = format!(
            r#"
            INSERT INTO notification_preferences (
                id, user_id, email_enabled, push_enabled, in_app_enabled, sms_enabled,
                quiet_hours_enabled, quiet_hours_start, quiet_hours_end, timezone,
                category_preferences, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (user_id) DO UPDATE SET
                email_enabled = EXCLUDED.email_enabled,
                push_enabled = EXCLUDED.push_enabled,
                in_app_enabled = EXCLUDED.in_app_enabled,
                sms_enabled = EXCLUDED.sms_enabled,
                quiet_hours_enabled = EXCLUDED.quiet_hours_enabled,
                quiet_hours_start = EXCLUDED.quiet_hours_start,
                quiet_hours_end = EXCLUDED.quiet_hours_end,
                timezone = EXCLUDED.timezone,
                category_preferences = EXCLUDED.category_preferences,
                updated_at = EXCLUDED.updated_at
            RETURNING {PREFERENCE_COLUMNS}
            "#
        );
        let prefs = bind_preferences(sqlx::query_as::<_, NotificationPreferences>(&sql), p)
            .fetch_one(&self.pool)
            .await?;

        Ok(prefs)
    }
}

fn bind_preferences<'q>(
    query: sqlx::query::QueryAs<
        'q,
        sqlx::Postgres,
        NotificationPreferences,
        sqlx::postgres::PgArguments,
    >,
    p: &'q NotificationPreferences,
) -> sqlx::query::QueryAs<'q, sqlx::Postgres, NotificationPreferences, sqlx::postgres::PgArguments>
{
    query
        .bind(p.id)
        .bind(&p.user_id)
        .bind(p.email_enabled)
        .bind(p.push_enabled)
        .bind(p.in_app_enabled)
        .bind(p.sms_enabled)
        .bind(p.quiet_hours_enabled)
        .bind(&p.quiet_hours_start)
        .bind(&p.quiet_hours_end)
        .bind(&p.timezone)
        .bind(sqlx::types::Json(&p.category_preferences))
        .bind(p.created_at)
        .bind(p.updated_at)
}
