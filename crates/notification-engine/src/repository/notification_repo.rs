//! 通知仓储（PostgreSQL）
//!
//! 状态更新全部采用条件更新（`WHERE status = $expected`），
//! 并发写入时同一次状态转换最多生效一次。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::traits::NotificationRepositoryTrait;
use crate::error::Result;
use crate::models::{
    Channel, Notification, NotificationFilter, NotificationStats, NotificationStatus,
    NotificationType, PageRequest, StatsScope,
};

const COLUMNS: &str = r#"
    id, user_id, organization_id, notification_type, channel, title, content, data,
    status, priority, scheduled_for, sent_at, read_at, template_id,
    related_entity_type, related_entity_id, failure_reason, created_at, updated_at
"#;

/// 列表与计数共用的过滤条件（参数 $1-$6）
const FILTER_CLAUSE: &str = r#"
    WHERE organization_id = $1
      AND ($2::varchar IS NULL OR user_id = $2)
      AND ($3::varchar IS NULL OR notification_type = $3)
      AND ($4::varchar IS NULL OR channel = $4)
      AND ($5::varchar IS NULL OR status = $5)
      AND ($6::boolean IS NULL OR (read_at IS NOT NULL) = $6)
"#;

/// 通知仓储
pub struct PgNotificationRepository {
    pool: PgPool,
}

impl PgNotificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationRepositoryTrait for PgNotificationRepository {
    async fn insert(&self, n: &Notification) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications (
                id, user_id, organization_id, notification_type, channel, title, content, data,
                status, priority, scheduled_for, sent_at, read_at, template_id,
                related_entity_type, related_entity_id, failure_reason, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(n.id)
        .bind(&n.user_id)
        .bind(&n.organization_id)
        .bind(n.notification_type)
        .bind(n.channel)
        .bind(&n.title)
        .bind(&n.content)
        .bind(&n.data)
        .bind(n.status)
        .bind(n.priority)
        .bind(n.scheduled_for)
        .bind(n.sent_at)
        .bind(n.read_at)
        .bind(n.template_id)
        .bind(&n.related_entity_type)
        .bind(&n.related_entity_id)
        .bind(&n.failure_reason)
        .bind(n.created_at)
        .bind(n.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Notification>> {
        let sql = format!("SELECT {COLUMNS} FROM notifications WHERE id = $1");
        let notification = sqlx::query_as::<_, Notification>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(notification)
    }

    async fn list(
        &self,
        organization_id: &str,
        filter: &NotificationFilter,
        page: PageRequest,
    ) -> Result<(Vec<Notification>, i64)> {
        let count_sql = format!("SELECT COUNT(*) FROM notifications {FILTER_CLAUSE}");
        let total: i64 = sqlx::query_scalar(&count_sql)
            .bind(organization_id)
            .bind(&filter.user_id)
            .bind(filter.notification_type)
            .bind(filter.channel)
            .bind(filter.status)
            .bind(filter.is_read)
            .fetch_one(&self.pool)
            .await?;

        let list_sql = format!(
            "SELECT {COLUMNS} FROM notifications {FILTER_CLAUSE} \
             ORDER BY created_at DESC, id DESC LIMIT $7 OFFSET $8"
        );
        let items = sqlx::query_as::<_, Notification>(&list_sql)
            .bind(organization_id)
            .bind(&filter.user_id)
            .bind(filter.notification_type)
            .bind(filter.channel)
            .bind(filter.status)
            .bind(filter.is_read)
            .bind(page.limit as i64)
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;

        Ok((items, total))
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected: NotificationStatus,
        target: NotificationStatus,
        at: DateTime<Utc>,
        failure_reason: Option<String>,
    ) -> Result<bool> {
        let sent_at = (target == NotificationStatus::Sent).then_some(at);
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET status = $3,
                sent_at = COALESCE($4, sent_at),
                failure_reason = CASE WHEN $3 = 'failed' THEN $5 ELSE NULL END,
                updated_at = $6
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(expected)
        .bind(target)
        .bind(sent_at)
        .bind(failure_reason)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_read(&self, id: Uuid, read_at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET read_at = $2, updated_at = $2
            WHERE id = $1 AND sent_at IS NOT NULL
            "#,
        )
        .bind(id)
        .bind(read_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_all_read(&self, user_id: &str, read_at: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET read_at = $2, updated_at = $2
            WHERE user_id = $1 AND sent_at IS NOT NULL AND read_at IS NULL
            "#,
        )
        .bind(user_id)
        .bind(read_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM notifications WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_due_scheduled(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Notification>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM notifications \
             WHERE status = 'scheduled' AND scheduled_for <= $1 \
             ORDER BY scheduled_for ASC \
             LIMIT $2"
        );
        let due = sqlx::query_as::<_, Notification>(&sql)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(due)
    }

    async fn count_unread(&self, user_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM notifications
            WHERE user_id = $1 AND sent_at IS NOT NULL AND read_at IS NULL
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn stats(
        &self,
        organization_id: &str,
        user_id: Option<String>,
        today_start: DateTime<Utc>,
    ) -> Result<NotificationStats> {
        let scope = if user_id.is_some() {
            StatsScope::User
        } else {
            StatsScope::Organization
        };
        let mut stats = NotificationStats::empty(scope);

        let rows = sqlx::query(
            r#"
            SELECT notification_type, channel, status, COUNT(*) AS cnt
            FROM notifications
            WHERE organization_id = $1 AND ($2::varchar IS NULL OR user_id = $2)
            GROUP BY notification_type, channel, status
            "#,
        )
        .bind(organization_id)
        .bind(&user_id)
        .fetch_all(&self.pool)
        .await?;

        for row in rows {
            let notification_type: NotificationType = row.try_get("notification_type")?;
            let channel: Channel = row.try_get("channel")?;
            let status: NotificationStatus = row.try_get("status")?;
            let count: i64 = row.try_get("cnt")?;

            stats.total += count;
            *stats.by_type.entry(notification_type).or_default() += count;
            *stats.by_channel.entry(channel).or_default() += count;
            *stats.by_status.entry(status).or_default() += count;
        }

        let summary = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE sent_at IS NOT NULL AND read_at IS NULL) AS unread,
                COUNT(*) FILTER (WHERE sent_at >= $3) AS sent_today,
                COUNT(*) FILTER (WHERE status = 'failed' AND updated_at >= $3) AS failed_today
            FROM notifications
            WHERE organization_id = $1 AND ($2::varchar IS NULL OR user_id = $2)
            "#,
        )
        .bind(organization_id)
        .bind(&user_id)
        .bind(today_start)
        .fetch_one(&self.pool)
        .await?;

        stats.unread = summary.try_get("unread")?;
        stats.sent_today = summary.try_get("sent_today")?;
        stats.failed_today = summary.try_get("failed_today")?;

        Ok(stats)
    }
}
