//! 推送订阅仓储

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::traits::PushSubscriptionRepositoryTrait;
use crate::error::Result;
use crate::models::PushSubscription;

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, endpoint, p256dh, auth, user_agent, is_active, \
     last_used_at, created_at, updated_at";

/// 推送订阅仓储
pub struct PushSubscriptionRepository {
    pool: PgPool,
}

impl PushSubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PushSubscriptionRepositoryTrait for PushSubscriptionRepository {
    async fn upsert(&self, s: &PushSubscription) -> Result<PushSubscription> {
        let sql = format!(
            r#"
            INSERT INTO push_subscriptions (
                id, user_id, endpoint, p256dh, auth, user_agent, is_active, last_used_at,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, TRUE, $7, $8, $9)
            ON CONFLICT (user_id, endpoint) DO UPDATE SET
                p256dh = EXCLUDED.p256dh,
                auth = EXCLUDED.auth,
                user_agent = EXCLUDED.user_agent,
                is_active = TRUE,
                updated_at = EXCLUDED.updated_at
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        );
        let subscription = sqlx::query_as::<_, PushSubscription>(&sql)
            .bind(s.id)
            .bind(&s.user_id)
            .bind(&s.endpoint)
            .bind(&s.p256dh)
            .bind(&s.auth)
            .bind(&s.user_agent)
            .bind(s.last_used_at)
            .bind(s.created_at)
            .bind(s.updated_at)
            .fetch_one(&self.pool)
            .await?;

        Ok(subscription)
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<PushSubscription>> {
        let sql = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM push_subscriptions \
             WHERE user_id = $1 ORDER BY created_at ASC"
        );
        let subscriptions = sqlx::query_as::<_, PushSubscription>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(subscriptions)
    }

    async fn list_active(&self, user_id: &str) -> Result<Vec<PushSubscription>> {
        let sql = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM push_subscriptions \
             WHERE user_id = $1 AND is_active = TRUE ORDER BY created_at ASC"
        );
        let subscriptions = sqlx::query_as::<_, PushSubscription>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(subscriptions)
    }

    async fn deactivate(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE push_subscriptions SET is_active = FALSE, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn touch(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE push_subscriptions SET last_used_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn delete(&self, user_id: &str, endpoint: &str) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM push_subscriptions WHERE user_id = $1 AND endpoint = $2")
                .bind(user_id)
                .bind(endpoint)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }
}
