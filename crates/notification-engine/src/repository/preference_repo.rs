//! 通知偏好仓储（PostgreSQL）
//!
//! (user_id, notification_type, channel) 上有唯一约束：
//! 默认值写入使用 `ON CONFLICT DO NOTHING`，单项更新使用 `ON CONFLICT DO UPDATE`，
//! 并发的首次访问不会重复插入。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use super::traits::PreferenceRepositoryTrait;
use crate::error::Result;
use crate::models::{Channel, Frequency, NotificationPreference, NotificationType, QuietHours};

/// 数据库行（quiet_hours 以 JSONB 存储）
#[derive(sqlx::FromRow)]
struct PreferenceRow {
    id: Uuid,
    user_id: String,
    organization_id: String,
    notification_type: NotificationType,
    channel: Channel,
    enabled: bool,
    frequency: Frequency,
    quiet_hours: Option<Json<QuietHours>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PreferenceRow> for NotificationPreference {
    fn from(row: PreferenceRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            organization_id: row.organization_id,
            notification_type: row.notification_type,
            channel: row.channel,
            enabled: row.enabled,
            frequency: row.frequency,
            quiet_hours: row.quiet_hours.map(|Json(q)| q),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const COLUMNS: &str = r#"
    id, user_id, organization_id, notification_type, channel, enabled, frequency,
    quiet_hours, created_at, updated_at
"#;

/// 偏好仓储
pub struct PgPreferenceRepository {
    pool: PgPool,
}

impl PgPreferenceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PreferenceRepositoryTrait for PgPreferenceRepository {
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<NotificationPreference>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM notification_preferences WHERE user_id = $1 \
             ORDER BY notification_type, channel"
        );
        let rows = sqlx::query_as::<_, PreferenceRow>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn find(
        &self,
        user_id: &str,
        notification_type: NotificationType,
        channel: Channel,
    ) -> Result<Option<NotificationPreference>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM notification_preferences \
             WHERE user_id = $1 AND notification_type = $2 AND channel = $3"
        );
        let row = sqlx::query_as::<_, PreferenceRow>(&sql)
            .bind(user_id)
            .bind(notification_type)
            .bind(channel)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Into::into))
    }

    async fn insert_missing(&self, preferences: &[NotificationPreference]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for p in preferences {
            let result = sqlx::query(
                r#"
                INSERT INTO notification_preferences (
                    id, user_id, organization_id, notification_type, channel, enabled,
                    frequency, quiet_hours, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(p.id)
            .bind(&p.user_id)
            .bind(&p.organization_id)
            .bind(p.notification_type)
            .bind(p.channel)
            .bind(p.enabled)
            .bind(p.frequency)
            .bind(p.quiet_hours.clone().map(Json))
            .bind(p.created_at)
            .bind(p.updated_at)
            .execute(&mut *tx)
            .await?;

            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn upsert(&self, p: &NotificationPreference) -> Result<NotificationPreference> {
        let sql = format!(
            "INSERT INTO notification_preferences ( \
                 id, user_id, organization_id, notification_type, channel, enabled, \
                 frequency, quiet_hours, created_at, updated_at \
             ) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (user_id, notification_type, channel) DO UPDATE \
             SET enabled = EXCLUDED.enabled, \
                 frequency = EXCLUDED.frequency, \
                 quiet_hours = EXCLUDED.quiet_hours, \
                 updated_at = EXCLUDED.updated_at \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, PreferenceRow>(&sql)
            .bind(p.id)
            .bind(&p.user_id)
            .bind(&p.organization_id)
            .bind(p.notification_type)
            .bind(p.channel)
            .bind(p.enabled)
            .bind(p.frequency)
            .bind(p.quiet_hours.clone().map(Json))
            .bind(p.created_at)
            .bind(p.updated_at)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.into())
    }

    async fn delete(
        &self,
        user_id: &str,
        notification_type: NotificationType,
        channel: Channel,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM notification_preferences
            WHERE user_id = $1 AND notification_type = $2 AND channel = $3
            "#,
        )
        .bind(user_id)
        .bind(notification_type)
        .bind(channel)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // 需要数据库连接
    async fn test_insert_missing_is_idempotent() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL");
        let pool = PgPool::connect(&url).await.unwrap();
        sqlx::migrate!("../../migrations").run(&pool).await.unwrap();
        let repo = PgPreferenceRepository::new(pool);

        let user = format!("pg-pref-{}", Uuid::new_v4());
        let seed = vec![NotificationPreference::new(
            &user,
            "pg-org",
            NotificationType::CycleCreated,
            Channel::Sms,
            false,
            Frequency::Immediate,
        )];

        assert_eq!(repo.insert_missing(&seed).await.unwrap(), 1);
        assert_eq!(repo.insert_missing(&seed).await.unwrap(), 0);
        assert_eq!(repo.list_by_user(&user).await.unwrap().len(), 1);
    }
}
