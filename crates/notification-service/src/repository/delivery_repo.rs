//! 投递记录仓储
//!
//! (notification_id, channel) 唯一，upsert 保证每个渠道只有一条记录

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::traits::DeliveryAttemptRepositoryTrait;
use crate::error::{NotificationError, Result};
use crate::models::{DeliveryAttempt, DeliveryChannel, DeliveryOutcome};

const ATTEMPT_COLUMNS: &str = "id, notification_id, channel, status, attempts, last_attempt_at, \
     delivered_at, failure_reason, external_id, metadata, created_at, updated_at";

/// 投递记录仓储
pub struct DeliveryAttemptRepository {
    pool: PgPool,
}

impl DeliveryAttemptRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeliveryAttemptRepositoryTrait for DeliveryAttemptRepository {
    async fn upsert_pending(
        &self,
        notification_id: Uuid,
        channel: DeliveryChannel,
        at: DateTime<Utc>,
    ) -> Result<DeliveryAttempt> {
        let sql = format!(
            r#"
            INSERT INTO notification_delivery_attempts
                (id, notification_id, channel, status, attempts, metadata, created_at, updated_at)
            VALUES ($1, $2, $3, 'pending', 0, '{{}}'::jsonb, $4, $4)
            ON CONFLICT (notification_id, channel)
            DO UPDATE SET status = 'pending', updated_at = EXCLUDED.updated_at
            RETURNING {ATTEMPT_COLUMNS}
            "#
        );
        let attempt = sqlx::query_as::<_, DeliveryAttempt>(&sql)
            .bind(Uuid::now_v7())
            .bind(notification_id)
            .bind(channel)
            .bind(at)
            .fetch_one(&self.pool)
            .await?;

        Ok(attempt)
    }

    async fn record_outcome(
        &self,
        notification_id: Uuid,
        channel: DeliveryChannel,
        outcome: &DeliveryOutcome,
    ) -> Result<DeliveryAttempt> {
        let sql = format!(
            r#"
            UPDATE notification_delivery_attempts
            SET status = $3,
                attempts = attempts + 1,
                last_attempt_at = $4,
                delivered_at = CASE WHEN $3 = 'delivered' THEN $4 ELSE delivered_at END,
                failure_reason = $5,
                external_id = COALESCE($6, external_id),
                metadata = $7,
                updated_at = $4
            WHERE notification_id = $1 AND channel = $2
            RETURNING {ATTEMPT_COLUMNS}
            "#
        );
        let attempt = sqlx::query_as::<_, DeliveryAttempt>(&sql)
            .bind(notification_id)
            .bind(channel)
            .bind(outcome.status)
            .bind(outcome.at)
            .bind(&outcome.failure_reason)
            .bind(&outcome.external_id)
            .bind(&outcome.metadata)
            .fetch_optional(&self.pool)
            .await?;

        attempt.ok_or_else(|| {
            NotificationError::Internal(format!(
                "投递记录不存在: notification_id={notification_id}, channel={}",
                channel.as_str()
            ))
        })
    }

    async fn list_by_notification(&self, notification_id: Uuid) -> Result<Vec<DeliveryAttempt>> {
        let sql = format!(
            "SELECT {ATTEMPT_COLUMNS} FROM notification_delivery_attempts \
             WHERE notification_id = $1 ORDER BY created_at ASC"
        );
        let attempts = sqlx::query_as::<_, DeliveryAttempt>(&sql)
            .bind(notification_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(attempts)
    }

    async fn delivery_summary(&self, user_id: &str) -> Result<(i64, i64, f64)> {
        let summary = sqlx::query_as::<_, (i64, i64, f64)>(
            r#"
            SELECT COUNT(*) FILTER (WHERE a.status = 'delivered'),
                   COUNT(*) FILTER (WHERE a.status = 'failed'),
                   COALESCE(
                       AVG(EXTRACT(EPOCH FROM (a.delivered_at - n.created_at)) * 1000)
                           FILTER (WHERE a.delivered_at IS NOT NULL),
                       0
                   )::FLOAT8
            FROM notification_delivery_attempts a
            JOIN notifications n ON n.id = a.notification_id
            WHERE n.user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(summary)
    }
}
