//! 通知仓储
//!
//! 提供通知的 CRUD、过滤分页查询以及读状态批量更新

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::traits::NotificationRepositoryTrait;
use crate::error::Result;
use crate::models::{
    Notification, NotificationPriority, NotificationQuery, NotificationStats, NotificationStatus,
    SortField, SortOrder,
};

const NOTIFICATION_COLUMNS: &str = "id, user_id, title, message, notification_type, category, \
     priority, status, channels, metadata, scheduled_at, expires_at, template_id, \
     template_variables, is_read, is_archived, read_at, archived_at, batch_id, created_at, updated_at";

/// priority 以 varchar 存储，排序时映射为数值
const PRIORITY_RANK: &str = "CASE priority WHEN 'low' THEN 0 WHEN 'medium' THEN 1 \
     WHEN 'high' THEN 2 WHEN 'urgent' THEN 3 ELSE 1 END";

/// 通知仓储
pub struct NotificationRepository {
    pool: PgPool,
}

impl NotificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 追加过滤条件，调用前 builder 已以 `WHERE user_id = $1` 结尾
    fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &NotificationQuery) {
        if let Some(t) = query.notification_type {
            builder.push(" AND notification_type = ").push_bind(t);
        }
        if let Some(c) = query.category {
            builder.push(" AND category = ").push_bind(c);
        }
        if let Some(p) = query.priority {
            builder.push(" AND priority = ").push_bind(p);
        }
        if let Some(s) = query.status {
            builder.push(" AND status = ").push_bind(s);
        }
        if let Some(is_read) = query.is_read {
            builder.push(" AND is_read = ").push_bind(is_read);
        }
        if let Some(is_archived) = query.is_archived {
            builder.push(" AND is_archived = ").push_bind(is_archived);
        }
        if let Some(start) = query.start_date {
            builder.push(" AND created_at >= ").push_bind(start);
        }
        if let Some(end) = query.end_date {
            builder.push(" AND created_at <= ").push_bind(end);
        }
    }

    async fn group_counts(&self, user_id: &str, column: &str) -> Result<HashMap<String, i64>> {
        let sql = format!(
            "SELECT {column} AS key, COUNT(*) AS count FROM notifications \
             WHERE user_id = $1 GROUP BY {column}"
        );
        let rows = sqlx::query_as::<_, (String, i64)>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().collect())
    }
}

#[async_trait]
impl NotificationRepositoryTrait for NotificationRepository {
    // ==================== 查询操作 ====================

    async fn get(&self, id: Uuid) -> Result<Option<Notification>> {
        let sql = format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = $1");
        let notification = sqlx::query_as::<_, Notification>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(notification)
    }

    async fn get_for_user(&self, user_id: &str, id: Uuid) -> Result<Option<Notification>> {
        let sql = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = $1 AND user_id = $2"
        );
        let notification = sqlx::query_as::<_, Notification>(&sql)
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(notification)
    }

    async fn list(
        &self,
        user_id: &str,
        query: &NotificationQuery,
    ) -> Result<(Vec<Notification>, i64)> {
        let mut count_builder =
            QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM notifications WHERE user_id = ");
        count_builder.push_bind(user_id.to_string());
        Self::push_filters(&mut count_builder, query);
        let total: i64 = count_builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE user_id = "
        ));
        builder.push_bind(user_id.to_string());
        Self::push_filters(&mut builder, query);

        builder.push(" ORDER BY ");
        match query.sort_by {
            SortField::Priority => builder.push(PRIORITY_RANK),
            field => builder.push(field.column()),
        };
        builder.push(match query.sort_order {
            SortOrder::Asc => " ASC",
            SortOrder::Desc => " DESC",
        });
        builder
            .push(", id DESC LIMIT ")
            .push_bind(query.limit())
            .push(" OFFSET ")
            .push_bind(query.offset());

        let items = builder
            .build_query_as::<Notification>()
            .fetch_all(&self.pool)
            .await?;

        Ok((items, total))
    }

    async fn unread_count(&self, user_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM notifications
            WHERE user_id = $1 AND is_read = FALSE AND is_archived = FALSE
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn stats(&self, user_id: &str) -> Result<NotificationStats> {
        let (total, unread, read, archived) = sqlx::query_as::<_, (i64, i64, i64, i64)>(
            r#"
            SELECT COUNT(*),
                   COUNT(*) FILTER (WHERE is_read = FALSE),
                   COUNT(*) FILTER (WHERE is_read = TRUE),
                   COUNT(*) FILTER (WHERE is_archived = TRUE)
            FROM notifications
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(NotificationStats {
            total,
            unread,
            read,
            archived,
            by_type: self.group_counts(user_id, "notification_type").await?,
            by_category: self.group_counts(user_id, "category").await?,
            by_priority: self.group_counts(user_id, "priority").await?,
            by_status: self.group_counts(user_id, "status").await?,
            ..Default::default()
        })
    }

    async fn list_due_deferred(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Notification>> {
        let sql = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications \
             WHERE status = 'pending' AND scheduled_at IS NOT NULL AND scheduled_at <= $1 \
             ORDER BY scheduled_at ASC LIMIT $2"
        );
        let items = sqlx::query_as::<_, Notification>(&sql)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(items)
    }

    // ==================== 写入操作 ====================

    async fn create(&self, n: &Notification) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications (
                id, user_id, title, message, notification_type, category, priority, status,
                channels, metadata, scheduled_at, expires_at, template_id, template_variables,
                is_read, is_archived, read_at, archived_at, batch_id, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                    $15, $16, $17, $18, $19, $20, $21)
            "#,
        )
        .bind(n.id)
        .bind(&n.user_id)
        .bind(&n.title)
        .bind(&n.message)
        .bind(n.notification_type)
        .bind(n.category)
        .bind(n.priority)
        .bind(n.status)
        .bind(sqlx::types::Json(&n.channels))
        .bind(&n.metadata)
        .bind(n.scheduled_at)
        .bind(n.expires_at)
        .bind(n.template_id)
        .bind(&n.template_variables)
        .bind(n.is_read)
        .bind(n.is_archived)
        .bind(n.read_at)
        .bind(n.archived_at)
        .bind(n.batch_id)
        .bind(n.created_at)
        .bind(n.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_read(&self, user_id: &str, ids: &[Uuid], at: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET is_read = TRUE, read_at = $3,
                status = CASE WHEN is_archived OR status = 'pending' THEN status ELSE 'read' END,
                updated_at = $3
            WHERE user_id = $1 AND id = ANY($2) AND is_read = FALSE
            "#,
        )
        .bind(user_id)
        .bind(ids)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn mark_unread(&self, user_id: &str, ids: &[Uuid]) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET is_read = FALSE, read_at = NULL,
                status = CASE WHEN status = 'read' THEN 'delivered' ELSE status END,
                updated_at = NOW()
            WHERE user_id = $1 AND id = ANY($2) AND is_read = TRUE
            "#,
        )
        .bind(user_id)
        .bind(ids)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn mark_all_read(&self, user_id: &str, at: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET is_read = TRUE, read_at = $2,
                status = CASE WHEN is_archived OR status = 'pending' THEN status ELSE 'read' END,
                updated_at = $2
            WHERE user_id = $1 AND is_read = FALSE
            "#,
        )
        .bind(user_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn archive(&self, user_id: &str, ids: &[Uuid], at: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET is_archived = TRUE, archived_at = $3,
                status = CASE WHEN status = 'pending' THEN status ELSE 'archived' END,
                updated_at = $3
            WHERE user_id = $1 AND id = ANY($2) AND is_archived = FALSE
            "#,
        )
        .bind(user_id)
        .bind(ids)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn update_priority(
        &self,
        user_id: &str,
        ids: &[Uuid],
        priority: NotificationPriority,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET priority = $3, updated_at = NOW()
            WHERE user_id = $1 AND id = ANY($2)
            "#,
        )
        .bind(user_id)
        .bind(ids)
        .bind(priority)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete(&self, user_id: &str, ids: &[Uuid]) -> Result<u64> {
        let result = sqlx::query("DELETE FROM notifications WHERE user_id = $1 AND id = ANY($2)")
            .bind(user_id)
            .bind(ids)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn clear_all(&self, user_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM notifications WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn update_delivery_status(&self, id: Uuid, status: NotificationStatus) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE notifications
            SET status = CASE
                    WHEN is_archived THEN 'archived'
                    WHEN is_read AND $2 <> 'failed' THEN 'read'
                    ELSE $2
                END,
                updated_at = NOW()
            WHERE id = $1 AND status NOT IN ('read', 'archived')
            "#,
        )
        .bind(id)
        .bind(status)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
