//! 批量任务仓储
//!
//! 状态转换在同一事务内加行锁校验，保证单调前进

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::traits::BatchRepositoryTrait;
use crate::error::{NotificationError, Result};
use crate::models::{BatchProgress, BatchStatus, NotificationBatch};

const BATCH_COLUMNS: &str = "id, name, description, template_id, template_variables, \
     notification_type, category, priority, channels, recipients, status, total_count, \
     success_count, failure_count, started_at, completed_at, created_by, created_at, updated_at";

/// 批量任务仓储
pub struct BatchRepository {
    pool: PgPool,
}

impl BatchRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BatchRepositoryTrait for BatchRepository {
    async fn create(&self, b: &NotificationBatch) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notification_batches (
                id, name, description, template_id, template_variables, notification_type,
                category, priority, channels, recipients, status, total_count, success_count,
                failure_count, started_at, completed_at, created_by, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                    $15, $16, $17, $18, $19)
            "#,
        )
        .bind(b.id)
        .bind(&b.name)
        .bind(&b.description)
        .bind(b.template_id)
        .bind(&b.template_variables)
        .bind(b.notification_type)
        .bind(b.category)
        .bind(b.priority)
        .bind(sqlx::types::Json(&b.channels))
        .bind(sqlx::types::Json(&b.recipients))
        .bind(b.status)
        .bind(b.total_count)
        .bind(b.success_count)
        .bind(b.failure_count)
        .bind(b.started_at)
        .bind(b.completed_at)
        .bind(&b.created_by)
        .bind(b.created_at)
        .bind(b.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<NotificationBatch>> {
        let sql = format!("SELECT {BATCH_COLUMNS} FROM notification_batches WHERE id = $1");
        let batch = sqlx::query_as::<_, NotificationBatch>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(batch)
    }

    async fn transition(&self, id: Uuid, progress: &BatchProgress) -> Result<NotificationBatch> {
        let mut tx = self.pool.begin().await?;

        let current: Option<BatchStatus> =
            sqlx::query_scalar("SELECT status FROM notification_batches WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let current = current.ok_or(NotificationError::BatchNotFound(id))?;

        if !current.can_transition_to(progress.status) {
            return Err(NotificationError::InvalidBatchTransition {
                batch_id: id,
                from: current,
                to: progress.status,
            });
        }

        let sql = format!(
            r#"
            UPDATE notification_batches
            SET status = $2,
                success_count = $3,
                failure_count = $4,
                started_at = CASE WHEN $2 = 'processing' THEN $5 ELSE started_at END,
                completed_at = CASE WHEN $2 IN ('completed', 'failed') THEN $5 ELSE completed_at END,
                updated_at = $5
            WHERE id = $1
            RETURNING {BATCH_COLUMNS}
            "#
        );
        let batch = sqlx::query_as::<_, NotificationBatch>(&sql)
            .bind(id)
            .bind(progress.status)
            .bind(progress.success_count)
            .bind(progress.failure_count)
            .bind(progress.at)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(batch)
    }
}
