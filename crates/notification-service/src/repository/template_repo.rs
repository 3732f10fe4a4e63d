//! 模板仓储

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::traits::TemplateRepositoryTrait;
use crate::error::Result;
use crate::models::NotificationTemplate;

const TEMPLATE_COLUMNS: &str = "id, name, title, message, notification_type, category, priority, \
     default_channels, variables, metadata, is_active, created_at, updated_at";

/// 模板仓储
pub struct TemplateRepository {
    pool: PgPool,
}

impl TemplateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TemplateRepositoryTrait for TemplateRepository {
    async fn create(&self, t: &NotificationTemplate) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notification_templates (
                id, name, title, message, notification_type, category, priority,
                default_channels, variables, metadata, is_active, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(t.id)
        .bind(&t.name)
        .bind(&t.title)
        .bind(&t.message)
        .bind(t.notification_type)
        .bind(t.category)
        .bind(t.priority)
        .bind(sqlx::types::Json(&t.default_channels))
        .bind(sqlx::types::Json(&t.variables))
        .bind(&t.metadata)
        .bind(t.is_active)
        .bind(t.created_at)
        .bind(t.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<NotificationTemplate>> {
        let sql = format!("SELECT {TEMPLATE_COLUMNS} FROM notification_templates WHERE id = $1");
        let template = sqlx::query_as::<_, NotificationTemplate>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(template)
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<NotificationTemplate>> {
        let sql = format!("SELECT {TEMPLATE_COLUMNS} FROM notification_templates WHERE name = $1");
        let template = sqlx::query_as::<_, NotificationTemplate>(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        Ok(template)
    }

    async fn list(&self, active_only: bool) -> Result<Vec<NotificationTemplate>> {
        let sql = format!(
            "SELECT {TEMPLATE_COLUMNS} FROM notification_templates \
             WHERE ($1 = FALSE OR is_active = TRUE) ORDER BY name ASC"
        );
        let templates = sqlx::query_as::<_, NotificationTemplate>(&sql)
            .bind(active_only)
            .fetch_all(&self.pool)
            .await?;

        Ok(templates)
    }

    async fn update(&self, t: &NotificationTemplate) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE notification_templates
            SET name = $2, title = $3, message = $4, notification_type = $5, category = $6,
                priority = $7, default_channels = $8, variables = $9, metadata = $10,
                is_active = $11, updated_at = $12
            WHERE id = $1
            "#,
        )
        .bind(t.id)
        .bind(&t.name)
        .bind(&t.title)
        .bind(&t.message)
        .bind(t.notification_type)
        .bind(t.category)
        .bind(t.priority)
        .bind(sqlx::types::Json(&t.default_channels))
        .bind(sqlx::types::Json(&t.variables))
        .bind(&t.metadata)
        .bind(t.is_active)
        .bind(t.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn deactivate(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE notification_templates SET is_active = FALSE, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
