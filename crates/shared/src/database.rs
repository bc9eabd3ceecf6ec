//! 数据库连接管理模块
//!
//! 通知引擎的 PostgreSQL 连接池：按配置建池、可选地在启动时执行嵌入的迁移，
//! 并在进程退出前排空连接。

use crate::config::DatabaseConfig;
use crate::error::{Result, SharedError};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

/// 通知引擎数据库句柄
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 建立连接池并确认数据库可用
    ///
    /// `run_migrations` 开启时随后执行 `migrations/` 下的迁移
    #[instrument(skip(config), fields(max_connections = config.max_connections))]
    pub async fn open(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect(&config.url)
            .await?;

        let db = Self { pool };
        let latency = db.health_check().await?;
        info!(latency_ms = latency.as_millis() as u64, "数据库连接池已建立");

        if config.run_migrations {
            db.run_migrations().await?;
        }
        Ok(db)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 健康检查，返回往返耗时
    pub async fn health_check(&self) -> Result<Duration> {
        let started = Instant::now();
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                warn!(error = %e, "数据库健康检查失败");
                SharedError::from(e)
            })?;
        Ok(started.elapsed())
    }

    /// 排空并关闭连接池（扫描器停止后调用）
    pub async fn close(&self) {
        let size = self.pool.size();
        let idle = self.pool.num_idle();
        self.pool.close().await;
        info!(size, idle, "数据库连接池已关闭");
    }

    /// 执行编译期嵌入的通知表迁移
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<()> {
        let migrator = sqlx::migrate!("../../migrations");
        migrator.run(&self.pool).await?;
        info!(count = migrator.iter().count(), "通知表迁移已应用");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // 需要数据库连接
    async fn test_open_and_health_check() {
        let config = DatabaseConfig {
            url: std::env::var("DATABASE_URL").unwrap_or_else(|_| DatabaseConfig::default().url),
            run_migrations: true,
            ..Default::default()
        };
        let db = Database::open(&config).await.unwrap();
        assert!(db.health_check().await.unwrap() < Duration::from_secs(5));

        let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert!(applied >= 1);
        db.close().await;
    }
}
