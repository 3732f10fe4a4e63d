//! 通知库连接池
//!
//! 通知、投递记录、模板、偏好、定时与批量任务都存放在同一个 PostgreSQL 库中。
//! 服务启动时建池，按配置执行 `migrations/` 下的建表脚本，关闭时归还连接。

use std::path::Path;
use std::time::{Duration, Instant};

use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, instrument};

use crate::config::DatabaseConfig;
use crate::error::Result;

/// 通知库连接池
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    #[instrument(skip(config), fields(max_connections = config.max_connections))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect(&config.url)
            .await?;

        info!(
            min_connections = config.min_connections,
            max_connections = config.max_connections,
            "通知库连接池已建立"
        );
        Ok(Self { pool })
    }

    /// 仓储适配器共用的连接池
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// `/health` 探针使用
    pub async fn health_check(&self) -> Result<()> {
        let started = Instant::now();
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        debug!(elapsed_ms = started.elapsed().as_millis() as u64, "通知库健康检查通过");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("通知库连接池已关闭");
    }

    /// 执行迁移目录中尚未应用的脚本
    ///
    /// 目录在运行时解析，部署时 migrations/ 随二进制一起分发
    #[instrument(skip(self))]
    pub async fn run_migrations(&self, dir: &str) -> Result<()> {
        let migrator = load_migrator(dir).await?;
        migrator.run(&self.pool).await?;
        info!(dir, scripts = migrator.iter().count(), "通知库迁移完成");
        Ok(())
    }
}

/// 读取迁移目录，不需要数据库连接
pub async fn load_migrator(dir: &str) -> Result<Migrator> {
    Ok(Migrator::new(Path::new(dir)).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn migrations_dir() -> String {
        format!("{}/../../migrations", env!("CARGO_MANIFEST_DIR"))
    }

    #[tokio::test]
    async fn test_notification_schema_migration_loads() {
        let migrator = load_migrator(&migrations_dir()).await.unwrap();
        let scripts: Vec<_> = migrator.iter().collect();

        assert_eq!(scripts.len(), 1);
        assert_eq!(scripts[0].version, 20260101000000);
        assert!(scripts[0].sql.contains("notifications"));
        assert!(scripts[0].sql.contains("notification_preferences"));
    }

    #[tokio::test]
    async fn test_missing_migration_dir_is_error() {
        assert!(load_migrator("/nonexistent/notify-migrations").await.is_err());
    }

    #[tokio::test]
    #[ignore] // 需要 DATABASE_URL 指向可用的 PostgreSQL
    async fn test_connect_migrate_and_health_check() {
        let config = DatabaseConfig {
            url: std::env::var("DATABASE_URL").unwrap_or_else(|_| DatabaseConfig::default().url),
            ..Default::default()
        };
        let db = Database::connect(&config).await.unwrap();
        db.run_migrations(&migrations_dir()).await.unwrap();
        db.health_check().await.unwrap();
        db.close().await;
    }
}
